//! `run` command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use cluster::WorkerCommand;
use contracts::{ClusterKind, MigrationBlueprint};
use tracing::{error, info, warn};

use crate::cli::{Cli, RunArgs};
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_migration(cli: &Cli, args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(kind) = args.implementation {
        info!(implementation = %kind, "Overriding implementation from CLI");
        blueprint.cluster.implementation = kind;
    }
    if let Some(size) = args.cluster_size {
        info!(cluster_size = size, "Overriding cluster size from CLI");
        blueprint.cluster.size = size;
    }
    config_loader::ConfigLoader::validate(&blueprint).context("Invalid CLI overrides")?;

    info!(
        implementation = %blueprint.cluster.implementation,
        cluster_size = blueprint.cluster.size,
        source = ?blueprint.source.source_type,
        sink = %blueprint.sink.name,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)
            .context("Failed to start metrics exporter")?;
        info!(port = args.metrics_port, "Metrics exporter listening");
    }

    let worker_command = if blueprint.cluster.implementation == ClusterKind::ProcessPool {
        Some(process_worker_command(cli, &args.config)?)
    } else {
        None
    };

    let pipeline_config = PipelineConfig {
        blueprint,
        max_batches: if args.max_batches == 0 {
            None
        } else {
            Some(args.max_batches)
        },
        worker_command,
    };

    info!("Starting migration...");
    let stats = Pipeline::new(pipeline_config)
        .run(setup_shutdown_signal())
        .await
        .context("Migration failed")?;

    stats.print_summary();

    if let Some(ref source_error) = stats.source_error {
        anyhow::bail!("Source failed mid-run: {}", source_error);
    }
    if let Some(failure) = stats.failure() {
        return Err(failure.into());
    }

    info!("Migrator finished");
    Ok(())
}

/// Command that re-launches this binary as a process-pool worker
///
/// Children load the same config file, so the path is made absolute first.
pub(super) fn process_worker_command(cli: &Cli, config: &Path) -> Result<WorkerCommand> {
    let config_path = std::path::absolute(config)
        .with_context(|| format!("Failed to resolve {}", config.display()))?;
    Ok(WorkerCommand::current_exe()
        .context("Failed to locate the migrator executable")?
        .args(cli.global_args())
        .args(["worker".to_string(), "--config".to_string()])
        .arg(config_path.display().to_string()))
}

/// Resolve on Ctrl+C or SIGTERM
pub(super) async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &MigrationBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Cluster:");
    println!("  Implementation: {}", blueprint.cluster.implementation);
    println!("  Workers: {}", blueprint.cluster.size);
    println!("  Channel capacity: {}", blueprint.cluster.channel_capacity);
    println!(
        "  Startup timeout: {}s",
        blueprint.cluster.startup_timeout_secs
    );
    println!("\nSource:");
    println!("  Type: {:?}", blueprint.source.source_type);
    println!("  Page size: {}", blueprint.source.page_size);
    println!("\nSink:");
    println!(
        "  {} ({:?})",
        blueprint.sink.name, blueprint.sink.sink_type
    );
    println!();
}
