//! Migration metrics
//!
//! Prometheus recorders for dispatch and worker activity, plus an in-memory
//! aggregator used for the end-of-run summary.

use std::collections::BTreeMap;

use contracts::{ClusterSummary, WorkerState};
use metrics::{counter, gauge, histogram};

/// Record one batch accepted by the engine
pub fn record_batch_dispatched(kind: &str, worker: usize, records: usize) {
    counter!(
        "migrator_batches_dispatched_total",
        "kind" => kind.to_string(),
        "worker" => worker.to_string()
    )
    .increment(1);

    histogram!("migrator_batch_size_records").record(records as f64);
}

/// Record a worker's outcome for one batch
pub fn record_batch_processed(worker: usize, records: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "migrator_batches_processed_total",
        "worker" => worker.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        counter!("migrator_records_processed_total").increment(records as u64);
    }
}

/// Record a worker lifecycle transition
pub fn record_worker_state(worker: usize, state: WorkerState) {
    counter!(
        "migrator_worker_transitions_total",
        "state" => state.as_str()
    )
    .increment(1);

    gauge!("migrator_worker_state", "worker" => worker.to_string()).set(state.as_u8() as f64);
}

/// Record one page pulled from the source
pub fn record_page_read(source: &str, records: usize) {
    counter!("migrator_pages_read_total", "source" => source.to_string()).increment(1);
    counter!("migrator_records_read_total", "source" => source.to_string())
        .increment(records as u64);
}

/// Record the final cluster outcome
pub fn record_cluster_summary(summary: &ClusterSummary) {
    gauge!("migrator_cluster_size", "kind" => summary.kind.as_str())
        .set(summary.cluster_size as f64);
    gauge!("migrator_workers_failed", "kind" => summary.kind.as_str())
        .set(summary.failed_workers().len() as f64);
}

/// Migration metrics aggregator
///
/// Aggregates in memory so the CLI can print a summary.
#[derive(Debug, Clone, Default)]
pub struct MigrationMetricsAggregator {
    /// Total batches dispatched
    pub total_batches: u64,

    /// Total records dispatched
    pub total_records: u64,

    /// Batch size statistics (records)
    pub batch_size_stats: RunningStats,

    /// Dispatch latency statistics (milliseconds)
    pub dispatch_latency_stats: RunningStats,

    /// Batches dispatched per worker
    pub per_worker_batches: BTreeMap<usize, u64>,
}

impl MigrationMetricsAggregator {
    /// Create a new aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one dispatched batch
    pub fn update(&mut self, worker: usize, records: usize, latency_ms: f64) {
        self.total_batches += 1;
        self.total_records += records as u64;
        self.batch_size_stats.push(records as f64);
        self.dispatch_latency_stats.push(latency_ms);
        *self.per_worker_batches.entry(worker).or_insert(0) += 1;
    }

    /// Build a summary
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_batches: self.total_batches,
            total_records: self.total_records,
            batch_size: StatsSummary::from(&self.batch_size_stats),
            dispatch_latency_ms: StatsSummary::from(&self.dispatch_latency_stats),
            per_worker_batches: self.per_worker_batches.clone(),
        }
    }

    /// Reset statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_batches: u64,
    pub total_records: u64,
    pub batch_size: StatsSummary,
    pub dispatch_latency_ms: StatsSummary,
    pub per_worker_batches: BTreeMap<usize, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Metrics Summary ===")?;
        writeln!(f, "Total batches: {}", self.total_batches)?;
        writeln!(f, "Total records: {}", self.total_records)?;
        writeln!(f, "Batch size (records): {}", self.batch_size)?;
        writeln!(f, "Dispatch latency (ms): {}", self.dispatch_latency_ms)?;

        if !self.per_worker_batches.is_empty() {
            writeln!(f, "Batches per worker:")?;
            for (worker, count) in &self.per_worker_batches {
                writeln!(f, "  worker-{}: {}", worker, count)?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// Add a sample
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// Sample count
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Minimum
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Maximum
    pub fn max(&self) -> f64 {
        self.max
    }
}
