use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use ragdesk::cli::commands::{
    handle_ask, handle_config, handle_delete, handle_documents, handle_history, handle_ingest,
    handle_reconcile, handle_status, handle_sync, handle_watch,
};
use ragdesk::cli::{Cli, Commands};
use ragdesk::models::{Config, LoggingConfig, OutputFormat};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ragdesk={level},warn")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_default();
    init_tracing(&config.logging, cli.verbose);

    let format = cli.format.unwrap_or(config.query.default_format);
    let verbose = cli.verbose;

    // The watcher drains in-flight ingestions itself instead of being dropped
    if matches!(cli.command, Commands::Watch(_)) {
        return run_command(cli.command, format, verbose).await;
    }

    tokio::select! {
        result = run_command(cli.command, format, verbose) => {
            result?;
        }
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, cancelling...");
        }
    }

    Ok(())
}

async fn run_command(command: Commands, format: OutputFormat, verbose: bool) -> Result<()> {
    match command {
        Commands::Ingest(args) => {
            handle_ingest(args, format, verbose).await?;
        }
        Commands::Delete(args) => {
            handle_delete(args, format, verbose).await?;
        }
        Commands::Documents(args) => {
            handle_documents(args, format, verbose).await?;
        }
        Commands::Ask(args) => {
            handle_ask(args, format, verbose).await?;
        }
        Commands::Watch(args) => {
            handle_watch(args, format, shutdown_signal()).await?;
        }
        Commands::Sync(args) => {
            handle_sync(args, format, verbose).await?;
        }
        Commands::Reconcile(args) => {
            handle_reconcile(args, format, verbose).await?;
        }
        Commands::History(args) => {
            handle_history(args, format, verbose).await?;
        }
        Commands::Status => {
            handle_status(format, verbose).await?;
        }
        Commands::Config(cmd) => {
            handle_config(cmd, format, verbose).await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
