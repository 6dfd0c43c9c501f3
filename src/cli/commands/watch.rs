//! Watch and sync commands for the knowledge base directory.

use anyhow::{Context, Result};
use clap::Args;
use std::future::Future;
use std::path::PathBuf;

use crate::cli::context::AppContext;
use crate::cli::output::get_formatter;
use crate::models::OutputFormat;
use crate::services::Watcher;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Directory to watch (defaults to watcher.path)
    #[arg(long, short = 'p')]
    pub path: Option<PathBuf>,

    /// Owner for ingested files (defaults to watcher.owner)
    #[arg(long, short = 'o')]
    pub owner: Option<String>,
}

async fn build_watcher(args: WatchArgs) -> Result<Watcher> {
    let ctx = AppContext::load().await?;
    let mut config = ctx.config.watcher.clone();
    if let Some(path) = args.path {
        config.path = path;
    }
    config.owner = ctx.owner(args.owner);

    Watcher::new(&config, ctx.ingest_service()?)
        .with_context(|| format!("failed to prepare {}", config.path.display()))
}

/// Runs until `shutdown` resolves; in-flight ingestions finish first.
pub async fn handle_watch<F>(args: WatchArgs, format: OutputFormat, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let watcher = build_watcher(args).await?;
    let formatter = get_formatter(format);

    println!(
        "{}",
        formatter.format_message(&format!(
            "Watching {} for {} (Ctrl+C to stop)",
            watcher.root().display(),
            watcher.owner()
        ))
    );
    watcher.run(shutdown).await.context("watcher failed")?;
    Ok(())
}

pub async fn handle_sync(args: WatchArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let watcher = build_watcher(args).await?;
    let formatter = get_formatter(format);

    if verbose {
        eprintln!("Syncing {} for {}", watcher.root().display(), watcher.owner());
    }

    let report = watcher.sync().await.context("sync failed")?;
    print!("{}", formatter.format_sync_report(&report));
    Ok(())
}
