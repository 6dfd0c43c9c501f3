//! Ask command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;
use std::time::Instant;

use crate::cli::context::AppContext;
use crate::cli::output::get_formatter;
use crate::models::{AnswerEvent, OutputFormat};

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, help = "Question to answer from your documents")]
    pub question: String,

    /// Owner whose documents are searched (defaults to watcher.owner)
    #[arg(long, short = 'o')]
    pub owner: Option<String>,

    #[arg(long, short = 's', help = "Print the answer as it is generated")]
    pub stream: bool,

    #[arg(long, short = 'k', help = "Number of chunks to retrieve as context")]
    pub top_k: Option<u64>,
}

pub async fn handle_ask(args: AskArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let question = args.question.trim();
    if question.is_empty() {
        anyhow::bail!("question cannot be empty");
    }
    if args.top_k == Some(0) {
        anyhow::bail!("top-k must be at least 1");
    }

    let ctx = AppContext::load().await?;
    let formatter = get_formatter(format);
    let owner = ctx.owner(args.owner);
    let query = ctx.query_service(args.top_k)?;
    let start_time = Instant::now();

    if verbose {
        eprintln!("Question: \"{question}\"");
        eprintln!("  Owner: {owner}");
        eprintln!("  Top-k: {}", args.top_k.unwrap_or(ctx.config.query.top_k));
    }

    // JSON output needs the whole answer, so it never streams
    if args.stream && !format.is_machine_readable() {
        let mut events = query
            .ask_stream(&owner, question)
            .await
            .context("failed to start answer")?;

        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            match event {
                AnswerEvent::Delta { content } => {
                    print!("{content}");
                    stdout.flush()?;
                }
                AnswerEvent::Done { sources } => {
                    println!();
                    print!("{}", formatter.format_sources(&sources));
                }
                AnswerEvent::Failed { message } => {
                    println!();
                    anyhow::bail!("answer generation failed: {message}");
                }
            }
        }
    } else {
        let answer = query
            .ask(&owner, question)
            .await
            .context("failed to answer question")?;
        print!("{}", formatter.format_answer(&answer));
    }

    if verbose {
        eprintln!("Total: {}ms", start_time.elapsed().as_millis());
    }

    Ok(())
}
