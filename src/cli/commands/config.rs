use anyhow::{Context, Result};
use clap::Subcommand;
use std::process::Command;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};

const MASK: &str = "********";

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a default configuration file")]
    Init {
        #[arg(long, short = 'f', help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show the effective configuration (file + environment)")]
    Show,
    #[command(about = "Show configuration file paths")]
    Path,
    #[command(about = "Edit configuration file")]
    Edit,
}

pub async fn handle_config(cmd: ConfigCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { force } => handle_init(force, formatter.as_ref()),
        ConfigCommand::Show => handle_show(format),
        ConfigCommand::Path => handle_path(),
        ConfigCommand::Edit => handle_edit(formatter.as_ref()),
    }
}

fn handle_init(force: bool, formatter: &dyn Formatter) -> Result<()> {
    let config_path = Config::config_path()
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    let path = Config::default().save().context("failed to write config")?;
    println!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

/// Copy of the config with secrets replaced.
fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    let mask = |value: &mut Option<String>| {
        if value.is_some() {
            *value = Some(MASK.to_string());
        }
    };
    mask(&mut config.embedding.api_key);
    mask(&mut config.completion.api_key);
    mask(&mut config.vector_store.api_key);
    mask(&mut config.vector_store.postgres.database_url);
    mask(&mut config.metadata.database_url);
    mask(&mut config.storage.s3.secret_access_key);
    config
}

fn handle_show(format: OutputFormat) -> Result<()> {
    let config = redacted(&Config::load()?);

    if format.is_machine_readable() {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Some(path) = Config::config_path().filter(|p| p.exists()) {
        println!("# Config file: {}", path.display());
    } else {
        println!("# No config file; showing defaults with environment overrides");
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn handle_path() -> Result<()> {
    let config_path = Config::config_path();

    println!("Configuration paths:");
    println!();

    match config_path {
        Some(ref path) if path.exists() => println!("Config file (active): {}", path.display()),
        Some(ref path) => println!("Config file (would be): {}", path.display()),
        None => println!("Config file: could not determine config directory"),
    }

    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        if env_path.exists() {
            println!(".env file (active): {}", env_path.display());
        } else {
            println!(".env file (would be): {}", env_path.display());
        }
    }

    Ok(())
}

fn handle_edit(formatter: &dyn Formatter) -> Result<()> {
    let config_path = Config::config_path()
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

    if !config_path.exists() {
        Config::default().save().context("failed to write config")?;
        println!(
            "{}",
            formatter.format_message(&format!("Created config at: {}", config_path.display()))
        );
    }

    let editor = std::env::var("EDITOR")
        .unwrap_or_else(|_| std::env::var("VISUAL").unwrap_or_else(|_| "vim".into()));

    Command::new(&editor)
        .arg(&config_path)
        .status()
        .context(format!("failed to open editor: {}", editor))?;

    Ok(())
}
