//! Run statistics and the end-of-run report.

use std::time::Duration;

use contracts::{ClusterKind, ClusterSummary};
use observability::MigrationMetricsAggregator;

use crate::error::CliError;

/// Statistics from a migration run
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Substrate the workers ran on
    pub kind: ClusterKind,

    /// Number of workers
    pub cluster_size: usize,

    /// Pages pulled from the source
    pub pages_read: u64,

    /// Pages the engine refused (dead worker channel)
    pub batches_rejected: u64,

    /// Total duration of the run, drain included
    pub duration: Duration,

    /// Paging was stopped by a shutdown signal
    pub interrupted: bool,

    /// Paging was stopped by a source failure
    pub source_error: Option<String>,

    /// Dispatch-side metrics
    pub metrics: MigrationMetricsAggregator,

    /// Worker-side outcome from `await_completion`
    pub summary: Option<ClusterSummary>,
}

impl RunStats {
    pub fn new(kind: ClusterKind, cluster_size: usize) -> Self {
        Self {
            kind,
            cluster_size,
            pages_read: 0,
            batches_rejected: 0,
            duration: Duration::ZERO,
            interrupted: false,
            source_error: None,
            metrics: MigrationMetricsAggregator::new(),
            summary: None,
        }
    }

    /// Records written per second, measured over the whole run
    pub fn records_per_sec(&self) -> f64 {
        let records = self
            .summary
            .as_ref()
            .map(|s| s.records_processed())
            .unwrap_or(0);

        if self.duration.as_secs_f64() > 0.0 {
            records as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failure().is_some()
    }

    /// Error describing lost work, if any
    pub fn failure(&self) -> Option<CliError> {
        let (failed_workers, failed_batches) = self
            .summary
            .as_ref()
            .map(|s| (s.failed_workers().len(), s.batches_failed()))
            .unwrap_or((0, 0));

        if failed_workers == 0 && failed_batches == 0 && self.batches_rejected == 0 {
            None
        } else {
            Some(CliError::MigrationFailed {
                failed_workers,
                failed_batches,
                rejected_batches: self.batches_rejected,
            })
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Migration Statistics ===\n");

        println!("Overview");
        println!("   Implementation: {}", self.kind);
        println!("   Workers: {}", self.cluster_size);
        println!("   Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   Pages read: {}", self.pages_read);
        println!("   Batches rejected: {}", self.batches_rejected);
        println!("   Records/s: {:.1}", self.records_per_sec());
        if self.interrupted {
            println!("   Stopped early by shutdown signal");
        }
        if let Some(ref error) = self.source_error {
            println!("   Source error: {}", error);
        }

        println!("\n{}", self.metrics.summary());

        let Some(ref summary) = self.summary else {
            return;
        };

        println!("Workers");
        for report in &summary.workers {
            println!(
                "   worker-{}: {} ok, {} failed, {} records ({})",
                report.worker,
                report.batches_processed,
                report.batches_failed,
                report.records_processed,
                report.state
            );
            if let Some(ref error) = report.startup_error {
                println!("      startup error: {}", error);
            }
            if let Some(ref error) = report.fatal_error {
                println!("      fatal error: {}", error);
            }
            if let Some(ref error) = report.last_error {
                println!("      last batch error: {}", error);
            }
        }

        println!(
            "\nTotal: {} of {} dispatched batches processed, {} records",
            summary.batches_processed(),
            summary.batches_dispatched,
            summary.records_processed()
        );
        println!();
    }
}
