//! Command-line interface.

pub mod commands;
pub mod context;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Ingest documents and ask questions about them.
#[derive(Debug, Parser)]
#[command(name = "ragdesk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest one or more files
    Ingest(commands::IngestArgs),

    /// Delete a document and its index entries
    Delete(commands::DeleteArgs),

    /// List ingested documents
    Documents(commands::DocumentsArgs),

    /// Ask a question about your documents
    Ask(commands::AskArgs),

    /// Watch the knowledge base directory and ingest changes
    Watch(commands::WatchArgs),

    /// Ingest every file in the knowledge base directory once
    Sync(commands::WatchArgs),

    /// Find (and optionally remove) documents with incomplete indexes
    Reconcile(commands::ReconcileArgs),

    /// Show recently asked questions
    History(commands::HistoryArgs),

    /// Check vector index and metadata store status
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
