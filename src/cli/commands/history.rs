use anyhow::{Context, Result};
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::get_formatter;
use crate::models::OutputFormat;

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Owner whose questions to show (defaults to watcher.owner)
    #[arg(long, short = 'o')]
    pub owner: Option<String>,

    #[arg(long, short = 'n', default_value_t = 10, help = "Maximum number of entries")]
    pub limit: u32,
}

pub async fn handle_history(args: HistoryArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let formatter = get_formatter(format);
    let owner = ctx.owner(args.owner);

    let records = ctx
        .query_service(None)?
        .history(&owner, args.limit)
        .await
        .context("failed to read query history")?;

    print!("{}", formatter.format_history(&records));
    Ok(())
}
