//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::ClusterKind;
use std::path::PathBuf;

/// Migrator - moves paginated record sets into a sink through a worker pool
#[derive(Parser, Debug)]
#[command(
    name = "migrator",
    author,
    version,
    about = "Paginated record migration over a pluggable worker pool",
    long_about = "Reads a record set page by page and spreads the pages round-robin over a\n\
                  fixed pool of workers. Workers run as tasks, OS threads or child\n\
                  processes; each owns one sink connection for the whole run."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MIGRATOR_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "MIGRATOR_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Global flags to hand down to a worker process
    pub fn global_args(&self) -> Vec<String> {
        let mut args = vec![
            "--log-format".to_string(),
            self.log_format.as_str().to_string(),
        ];
        if self.quiet {
            args.push("--quiet".to_string());
        } else if self.verbose > 0 {
            args.push(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        args
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the migration
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),

    /// Run the migration once per implementation and compare timings
    Benchmark(BenchmarkArgs),

    /// Serve one process-pool worker over stdin/stdout
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "migrator.toml",
        env = "MIGRATOR_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the worker substrate (cooperative, thread_pool, process_pool)
    #[arg(long, value_parser = parse_kind, env = "MIGRATOR_IMPLEMENTATION")]
    pub implementation: Option<ClusterKind>,

    /// Override the number of workers
    #[arg(long, env = "MIGRATOR_CLUSTER_SIZE")]
    pub cluster_size: Option<usize>,

    /// Stop paging after this many batches (0 = unlimited)
    #[arg(long, default_value = "0", env = "MIGRATOR_MAX_BATCHES")]
    pub max_batches: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "MIGRATOR_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "migrator.toml", env = "MIGRATOR_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "migrator.toml", env = "MIGRATOR_CONFIG")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `benchmark` command
#[derive(Parser, Debug)]
pub struct BenchmarkArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "migrator.toml", env = "MIGRATOR_CONFIG")]
    pub config: PathBuf,

    /// Implementations to compare, in order (default: all three)
    #[arg(long = "implementation", value_parser = parse_kind, value_delimiter = ',')]
    pub implementations: Vec<ClusterKind>,

    /// Override the number of workers
    #[arg(long)]
    pub cluster_size: Option<usize>,

    /// Stop each run after this many batches (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub max_batches: u64,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Also write the JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the hidden `worker` command
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Configuration file the parent was started with
    #[arg(short, long)]
    pub config: PathBuf,

    /// Worker index, set by the parent
    #[arg(long, env = "MIGRATOR_WORKER_INDEX")]
    pub index: usize,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        }
    }
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

fn parse_kind(raw: &str) -> Result<ClusterKind, String> {
    raw.parse::<ClusterKind>().map_err(|e| e.to_string())
}
