//! Wrangle CLI - dataset writes, catalog inspection and Athena queries.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wrangle_core::config::LogFormat;
use wrangle_core::Config;

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Invalid arguments (values, combinations, unsupported types)
    ValidationError = 2,
    /// Catalog error (missing table, service failure)
    CatalogError = 3,
    /// Query failed, was cancelled or the service rejected it
    QueryError = 4,
    /// Storage error (S3, filesystem)
    StorageError = 5,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(e) = error.downcast_ref::<wrangle_core::Error>() {
            return match e {
                wrangle_core::Error::Config(_) => ExitCode::ConfigError,
                wrangle_core::Error::Validation(_) => ExitCode::ValidationError,
                wrangle_core::Error::Catalog(_) => ExitCode::CatalogError,
                wrangle_core::Error::Query(_) => ExitCode::QueryError,
                wrangle_core::Error::Storage(_) => ExitCode::StorageError,
                _ => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "wrangle")]
#[command(about = "S3 datasets, Glue catalog and Athena queries", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an Athena query and print the result
    Query(commands::query::QueryArgs),

    /// Write a local CSV file as a dataset or single object
    Write(commands::write::WriteArgs),

    /// Inspect and edit catalog metadata
    Catalog {
        #[command(subcommand)]
        action: commands::catalog::CatalogAction,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log settings come from the config file when it parses, JSON at info otherwise
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format)
        .unwrap_or(LogFormat::Json);
    let log_level = monitoring
        .as_ref()
        .map(|m| m.log_level.as_str())
        .unwrap_or("info");

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(log_level),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Query(args) => {
            let config = load_config(&cli.config)?;
            commands::query::run(config, args).await?;
        }

        Commands::Write(args) => {
            let config = load_config(&cli.config)?;
            commands::write::run(config, args).await?;
        }

        Commands::Catalog { action } => {
            let config = load_config(&cli.config)?;
            commands::catalog::run(config, action).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("wrangle.toml"));

    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}
