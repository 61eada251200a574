//! Hidden `worker` command: one process-pool worker.
//!
//! stdout carries the binary frame protocol, so nothing here may print to it.
//! Logs go to stderr, which the parent inherits.

use std::sync::Arc;

use anyhow::{Context, Result};
use cluster::{codec, WorkerEvent};
use tracing::{debug, info};

use crate::cli::WorkerArgs;
use crate::error::CliError;

/// Execute the `worker` command
pub async fn run_worker(args: &WorkerArgs) -> Result<()> {
    debug!(worker = args.index, config = %args.config.display(), "Worker process starting");

    let sink = match load_sink(args) {
        Ok(sink) => sink,
        Err(e) => {
            // Tell the parent before exiting so it does not wait for the timeout
            let message = format!("{e:#}");
            let mut stdout = tokio::io::stdout();
            codec::write_frame(&mut stdout, &WorkerEvent::StartupFailed { message: message.clone() })
                .await
                .context("Failed to report startup failure")?;
            return Err(CliError::worker(args.index, message).into());
        }
    };

    let report = cluster::serve_process_worker(Arc::new(sink), args.index)
        .await
        .with_context(|| format!("Worker {} lost its pipe", args.index))?;

    info!(
        worker = report.worker,
        batches = report.batches_processed,
        failed = report.batches_failed,
        records = report.records_processed,
        "Worker process finished"
    );

    Ok(())
}

fn load_sink(args: &WorkerArgs) -> Result<cluster::SinkExecutor> {
    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let sink = cluster::create_sink(&blueprint.sink).context("Failed to create sink")?;
    Ok(sink)
}
