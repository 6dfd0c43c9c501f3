//! Ingest command implementation.

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::cli::context::AppContext;
use crate::cli::output::get_formatter;
use crate::error::IngestError;
use crate::models::{IngestOutcome, OutputFormat};
use crate::services::SyncReport;
use crate::utils::{has_allowed_extension, matches_any_pattern};

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Files or directories to ingest
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Owner of the ingested documents (defaults to watcher.owner)
    #[arg(long, short = 'o')]
    pub owner: Option<String>,

    /// File patterns to exclude when walking directories (can be specified multiple times)
    #[arg(long, short = 'e')]
    pub exclude: Vec<String>,
}

pub async fn handle_ingest(args: IngestArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let formatter = get_formatter(format);
    let owner = ctx.owner(args.owner);
    let ingest = ctx.ingest_service()?;

    let mut excludes = args.exclude;
    excludes.extend(ctx.config.watcher.exclude_patterns.iter().cloned());

    let mut files = Vec::new();
    for path in &args.paths {
        files.extend(collect_files(path, &excludes, &ctx.config.ingestion.allowed_extensions)?);
    }

    if files.is_empty() {
        println!("{}", formatter.format_message("No supported files found to ingest."));
        return Ok(());
    }

    if verbose {
        eprintln!("Ingesting {} files as {}", files.len(), owner);
    }

    let pb = if files.len() > 1 && format == OutputFormat::Text {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .context("invalid progress template")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut report = SyncReport {
        scanned: files.len(),
        ..Default::default()
    };
    let mut results: Vec<(PathBuf, Result<IngestOutcome, IngestError>)> = Vec::new();

    for file in files {
        if let Some(pb) = &pb {
            pb.set_message(file.display().to_string());
        }
        let result = ingest.ingest_path(&owner, &file).await;
        match &result {
            Ok(IngestOutcome::Created(_)) => report.ingested += 1,
            Ok(IngestOutcome::Duplicate(_)) => report.duplicates += 1,
            Err(_) => report.failed += 1,
        }
        results.push((file, result));
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if format.is_machine_readable() {
        let entries: Vec<serde_json::Value> = results
            .iter()
            .map(|(path, result)| match result {
                Ok(outcome) => serde_json::json!({
                    "path": path,
                    "result": outcome,
                }),
                Err(e) => serde_json::json!({
                    "path": path,
                    "error": e.to_string(),
                }),
            })
            .collect();
        let output = serde_json::json!({
            "owner": owner,
            "results": entries,
            "summary": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for (path, result) in &results {
            match result {
                Ok(outcome) => print!("{}", formatter.format_outcome(outcome)),
                Err(e) => eprint!(
                    "{}",
                    formatter.format_error(&format!("{}: {}", path.display(), e))
                ),
            }
        }
        if results.len() > 1 {
            println!();
            print!("{}", formatter.format_sync_report(&report));
        }
    }

    if report.failed > 0 {
        anyhow::bail!("{} of {} files failed to ingest", report.failed, report.scanned);
    }
    Ok(())
}

/// A file argument is taken as-is; directories are walked for supported files.
fn collect_files(path: &Path, exclude: &[String], allowed: &[String]) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.exists() {
        anyhow::bail!("path does not exist: {}", path.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.context("failed to read directory entry")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let entry_path = entry.path();
        let relative = entry_path.strip_prefix(path).unwrap_or(entry_path);
        if matches_any_pattern(relative, exclude) || !has_allowed_extension(entry_path, allowed) {
            continue;
        }
        files.push(entry_path.to_path_buf());
    }
    files.sort();
    Ok(files)
}
