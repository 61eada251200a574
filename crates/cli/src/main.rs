//! # Migrator CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Configuration loading and validation
//! - The migration run (page, dispatch, drain)
//! - A benchmark that repeats the run on every implementation
//! - The hidden `worker` command that process-pool children run

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{run_benchmark, run_info, run_migration, run_validate, run_worker};

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli)?;

    // A worker process gets one cooperative scheduler of its own
    let runtime = match cli.command {
        Commands::Worker(_) => tokio::runtime::Builder::new_current_thread(),
        _ => tokio::runtime::Builder::new_multi_thread(),
    }
    .enable_all()
    .build()
    .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(async {
        match &cli.command {
            Commands::Run(args) => {
                info!(version = env!("CARGO_PKG_VERSION"), "Migrator starting");
                run_migration(&cli, args).await
            }
            Commands::Validate(args) => run_validate(args),
            Commands::Info(args) => run_info(args),
            Commands::Benchmark(args) => run_benchmark(&cli, args).await,
            Commands::Worker(args) => run_worker(args).await,
        }
    });

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging based on CLI options
fn init_logging(cli: &Cli) -> Result<()> {
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else {
        let default_level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    observability::init_tracing_with_filter(cli.log_format.into(), filter)
}
