//! `benchmark` command implementation.
//!
//! Runs the same migration once per worker substrate, one after another, and
//! compares wall-clock time and throughput.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use cluster::WorkerCommand;
use contracts::{ClusterKind, MigrationBlueprint};
use serde::Serialize;
use tracing::{info, warn};

use super::run::{process_worker_command, setup_shutdown_signal};
use crate::cli::{BenchmarkArgs, Cli};
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig, RunStats};

/// Outcome of one substrate's run
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkEntry {
    pub implementation: ClusterKind,
    pub cluster_size: usize,
    pub duration_secs: f64,
    pub pages_read: u64,
    pub records_processed: u64,
    pub records_per_sec: f64,
    pub failed_workers: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BenchmarkEntry {
    fn from_stats(stats: &RunStats) -> Self {
        let error = match (&stats.source_error, stats.failure()) {
            (Some(source_error), _) => Some(format!("source failed mid-run: {source_error}")),
            (None, Some(failure)) => Some(failure.to_string()),
            (None, None) => None,
        };

        Self {
            implementation: stats.kind,
            cluster_size: stats.cluster_size,
            duration_secs: stats.duration.as_secs_f64(),
            pages_read: stats.pages_read,
            records_processed: stats
                .summary
                .as_ref()
                .map(|s| s.records_processed())
                .unwrap_or(0),
            records_per_sec: stats.records_per_sec(),
            failed_workers: stats
                .summary
                .as_ref()
                .map(|s| s.failed_workers())
                .unwrap_or_default(),
            error,
        }
    }

    fn failed(
        kind: ClusterKind,
        cluster_size: usize,
        elapsed: Duration,
        error: &anyhow::Error,
    ) -> Self {
        Self {
            implementation: kind,
            cluster_size,
            duration_secs: elapsed.as_secs_f64(),
            pages_read: 0,
            records_processed: 0,
            records_per_sec: 0.0,
            failed_workers: Vec::new(),
            error: Some(format!("{error:#}")),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Every entry plus the settings they share
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub cluster_size: usize,
    pub page_size: usize,
    pub interrupted: bool,
    pub results: Vec<BenchmarkEntry>,
}

impl BenchmarkReport {
    /// Successful entries, fastest first
    pub fn ranked(&self) -> Vec<&BenchmarkEntry> {
        let mut ranked: Vec<_> = self.results.iter().filter(|e| e.is_ok()).collect();
        ranked.sort_by(|a, b| a.duration_secs.total_cmp(&b.duration_secs));
        ranked
    }

    pub fn failed_implementations(&self) -> Vec<ClusterKind> {
        self.results
            .iter()
            .filter(|e| !e.is_ok())
            .map(|e| e.implementation)
            .collect()
    }

    pub fn print(&self) {
        println!("\n=== Benchmark Results ===\n");
        println!("   Workers: {}", self.cluster_size);
        println!("   Page size: {}", self.page_size);
        if self.interrupted {
            println!("   Stopped early by shutdown signal");
        }
        println!();

        println!(
            "{:<15} {:>12} {:>12} {:>14}  Status",
            "Implementation", "Time (s)", "Records", "Records/s"
        );
        println!("{}", "-".repeat(66));

        let mut rows: Vec<_> = self.results.iter().collect();
        rows.sort_by(|a, b| a.duration_secs.total_cmp(&b.duration_secs));
        for entry in rows {
            println!(
                "{:<15} {:>12.2} {:>12} {:>14.1}  {}",
                entry.implementation.as_str(),
                entry.duration_secs,
                entry.records_processed,
                entry.records_per_sec,
                entry.error.as_deref().unwrap_or("ok")
            );
        }

        let ranked = self.ranked();
        let Some(fastest) = ranked.first() else {
            println!();
            return;
        };
        if ranked.len() > 1 && fastest.duration_secs > 0.0 {
            println!("\nCompared with {}:", fastest.implementation);
            for entry in &ranked[1..] {
                println!(
                    "   {}: {:.2}x ({:+.2}s)",
                    entry.implementation,
                    entry.duration_secs / fastest.duration_secs,
                    entry.duration_secs - fastest.duration_secs
                );
            }
        }
        println!();
    }
}

/// Execute the `benchmark` command
pub async fn run_benchmark(cli: &Cli, args: &BenchmarkArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(size) = args.cluster_size {
        info!(cluster_size = size, "Overriding cluster size from CLI");
        blueprint.cluster.size = size;
    }
    config_loader::ConfigLoader::validate(&blueprint).context("Invalid CLI overrides")?;

    let kinds = if args.implementations.is_empty() {
        ClusterKind::ALL.to_vec()
    } else {
        args.implementations.clone()
    };
    let worker_command = if kinds.contains(&ClusterKind::ProcessPool) {
        Some(process_worker_command(cli, &args.config)?)
    } else {
        None
    };
    let max_batches = (args.max_batches != 0).then_some(args.max_batches);

    let shutdown = setup_shutdown_signal();
    tokio::pin!(shutdown);
    let report = benchmark(
        &blueprint,
        &kinds,
        max_batches,
        worker_command,
        shutdown.as_mut(),
    )
    .await;

    if args.json {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialize benchmark report")?;
        println!("{}", json);
    } else {
        report.print();
    }
    if let Some(ref path) = args.output {
        save_report(&report, path)?;
    }

    let failed = report.failed_implementations();
    if !failed.is_empty() {
        return Err(CliError::BenchmarkFailed {
            implementations: failed
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
        .into());
    }
    Ok(())
}

/// Run the blueprint once per kind, in order
///
/// A run that fails is recorded and the next kind still runs. Once `shutdown`
/// resolves the current run drains and no further kind is started.
pub async fn benchmark<F>(
    blueprint: &MigrationBlueprint,
    kinds: &[ClusterKind],
    max_batches: Option<u64>,
    worker_command: Option<WorkerCommand>,
    mut shutdown: Pin<&mut F>,
) -> BenchmarkReport
where
    F: Future<Output = ()>,
{
    let mut report = BenchmarkReport {
        cluster_size: blueprint.cluster.size,
        page_size: blueprint.source.page_size,
        interrupted: false,
        results: Vec::with_capacity(kinds.len()),
    };

    for &kind in kinds {
        let mut run_blueprint = blueprint.clone();
        run_blueprint.cluster.implementation = kind;
        info!(implementation = %kind, workers = blueprint.cluster.size, "Benchmarking");

        let pipeline = Pipeline::new(PipelineConfig {
            blueprint: run_blueprint,
            max_batches,
            worker_command: worker_command
                .clone()
                .filter(|_| kind == ClusterKind::ProcessPool),
        });

        let started = std::time::Instant::now();
        let entry = match pipeline.run(shutdown.as_mut()).await {
            Ok(stats) => {
                let entry = BenchmarkEntry::from_stats(&stats);
                if stats.interrupted {
                    report.interrupted = true;
                }
                entry
            }
            Err(e) => {
                warn!(implementation = %kind, error = %e, "Benchmark run failed");
                BenchmarkEntry::failed(kind, blueprint.cluster.size, started.elapsed(), &e)
            }
        };

        info!(
            implementation = %kind,
            seconds = entry.duration_secs,
            records = entry.records_processed,
            "Benchmark run finished"
        );
        report.results.push(entry);

        if report.interrupted {
            warn!("Shutdown requested, skipping remaining implementations");
            break;
        }
    }

    report
}

fn save_report(report: &BenchmarkReport, path: &Path) -> Result<()> {
    let json =
        serde_json::to_string_pretty(report).context("Failed to serialize benchmark report")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Benchmark report saved");
    Ok(())
}
