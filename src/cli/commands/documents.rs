//! Document listing and deletion.

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::get_formatter;
use crate::models::OutputFormat;

#[derive(Debug, Args)]
pub struct DocumentsArgs {
    /// Owner whose documents to list (defaults to watcher.owner)
    #[arg(long, short = 'o')]
    pub owner: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Document id to delete
    #[arg(required = true)]
    pub document_id: String,

    /// Owner of the document (defaults to watcher.owner)
    #[arg(long, short = 'o')]
    pub owner: Option<String>,

    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub force: bool,
}

pub async fn handle_documents(args: DocumentsArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let formatter = get_formatter(format);
    let owner = ctx.owner(args.owner);

    let documents = ctx
        .ingest_service()?
        .list(&owner)
        .await
        .context("failed to list documents")?;

    print!("{}", formatter.format_documents(&owner, &documents));
    Ok(())
}

pub async fn handle_delete(args: DeleteArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let formatter = get_formatter(format);
    let owner = ctx.owner(args.owner);
    let ingest = ctx.ingest_service()?;

    let document = ingest
        .get(&owner, &args.document_id)
        .await
        .with_context(|| format!("document {} not found for {}", args.document_id, owner))?;

    if !args.force {
        println!(
            "This will delete '{}' ({} chunks) and its index entries. Continue? [y/N]",
            document.filename, document.chunk_count
        );
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", formatter.format_message("Aborted."));
            return Ok(());
        }
    }

    if verbose {
        eprintln!("Deleting {} ({})", document.id, document.storage_key);
    }

    let deleted = ingest
        .delete(&owner, &document.id)
        .await
        .context("failed to delete document")?;

    println!(
        "{}",
        formatter.format_message(&format!("Deleted {} ({})", deleted.filename, deleted.id))
    );
    Ok(())
}
