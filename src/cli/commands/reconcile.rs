use anyhow::{Context, Result};
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::get_formatter;
use crate::models::OutputFormat;

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Owner whose documents to check (defaults to watcher.owner)
    #[arg(long, short = 'o')]
    pub owner: Option<String>,

    /// Remove documents with incomplete indexes so they can be ingested again
    #[arg(long)]
    pub repair: bool,
}

pub async fn handle_reconcile(args: ReconcileArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let formatter = get_formatter(format);
    let owner = ctx.owner(args.owner);

    let report = ctx
        .ingest_service()?
        .reconcile(&owner, args.repair)
        .await
        .context("reconcile failed")?;

    print!("{}", formatter.format_reconcile(&report, args.repair));
    Ok(())
}
