//! Pipeline orchestrator - pages the source into the worker cluster.
//!
//! The caller loop owns the source. Each page becomes one batch and goes to
//! the next worker in round-robin order. Whatever stops the loop (exhaustion,
//! `max_batches`, a shutdown signal or a source error), the cluster is always
//! drained with `await_completion` before returning.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use cluster::{ClusterConfig, DispatchEngine, EngineFactory, WorkerCommand};
use contracts::{Batch, MigrationBlueprint, PageSource};
use observability::record_page_read;
use tracing::{debug, error, info, warn};

use super::RunStats;

/// Log a progress line every this many dispatched batches
const PROGRESS_EVERY: u64 = 100;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The migration blueprint, overrides already applied
    pub blueprint: MigrationBlueprint,

    /// Maximum number of pages to read (None = until the source is exhausted)
    pub max_batches: Option<u64>,

    /// How to re-launch this binary as a process-pool worker
    pub worker_command: Option<WorkerCommand>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the migration to completion
    ///
    /// When `shutdown` resolves, paging stops and the batches already
    /// dispatched are still drained.
    pub async fn run<F>(self, shutdown: F) -> Result<RunStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        info!(
            source = ?blueprint.source.source_type,
            page_size = blueprint.source.page_size,
            "Opening source"
        );
        let mut source = ingestion::create_source(&blueprint.source)
            .await
            .context("Failed to open source")?;

        let sink = cluster::create_sink(&blueprint.sink).context("Failed to create sink")?;

        let mut cluster_config = ClusterConfig::from_settings(&blueprint.cluster);
        if let Some(command) = self.config.worker_command.clone() {
            cluster_config = cluster_config.with_worker_command(command);
        }

        let mut engine = EngineFactory::create(Arc::new(sink), cluster_config)
            .context("Failed to create dispatch engine")?;

        info!(
            implementation = %engine.kind(),
            cluster_size = engine.cluster_size(),
            sink = %blueprint.sink.name,
            "Starting workers"
        );
        engine
            .initialize()
            .await
            .context("Failed to start worker cluster")?;

        let mut stats = RunStats::new(engine.kind(), engine.cluster_size());
        let max_batches = self.config.max_batches;

        tokio::pin!(shutdown);

        loop {
            if let Some(max) = max_batches {
                if stats.pages_read >= max {
                    info!(pages = stats.pages_read, "Reached max batches limit");
                    break;
                }
            }

            let page = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!("Shutdown requested, draining workers");
                    stats.interrupted = true;
                    break;
                }
                page = source.next_page() => page,
            };

            let page = match page {
                Ok(Some(page)) => page,
                Ok(None) => {
                    debug!(pages = stats.pages_read, "Source exhausted");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Source read failed, draining workers");
                    stats.source_error = Some(e.to_string());
                    break;
                }
            };

            let records = page.len();
            stats.pages_read += 1;
            record_page_read(source.name(), records);

            let dispatched_at = Instant::now();
            match engine.dispatch(Batch::new(page)).await {
                Ok(worker) => {
                    let latency_ms = dispatched_at.elapsed().as_secs_f64() * 1000.0;
                    stats.metrics.update(worker, records, latency_ms);

                    if stats.metrics.total_batches % PROGRESS_EVERY == 0 {
                        info!(
                            batches = stats.metrics.total_batches,
                            records = stats.metrics.total_records,
                            "Migration progress"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, records, "Batch rejected");
                    stats.batches_rejected += 1;
                }
            }
        }

        info!(
            pages = stats.pages_read,
            "Paging finished, waiting for workers to drain"
        );
        let summary = engine
            .await_completion()
            .await
            .context("Failed to drain worker cluster")?;

        stats.duration = start_time.elapsed();
        stats.summary = Some(summary);

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            records_per_sec = format!("{:.1}", stats.records_per_sec()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ClusterKind, ClusterSettings, ConfigVersion, SinkConfig, SinkType, SourceConfig,
        SourceType,
    };
    use std::collections::HashMap;

    fn blueprint(kind: ClusterKind, count: usize, page_size: usize, dir: &str) -> MigrationBlueprint {
        MigrationBlueprint {
            version: ConfigVersion::V1,
            cluster: ClusterSettings {
                implementation: kind,
                size: 3,
                ..Default::default()
            },
            source: SourceConfig {
                source_type: SourceType::Mock,
                page_size,
                params: HashMap::from([("count".to_string(), count.to_string())]),
            },
            sink: SinkConfig {
                name: "users".into(),
                sink_type: SinkType::File,
                params: HashMap::from([("dir".to_string(), dir.to_string())]),
            },
        }
    }

    fn count_lines(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| {
                let content = std::fs::read_to_string(entry.unwrap().path()).unwrap();
                content.lines().count()
            })
            .sum()
    }

    #[tokio::test]
    async fn test_cooperative_run_writes_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            blueprint: blueprint(ClusterKind::Cooperative, 250, 40, dir.path().to_str().unwrap()),
            max_batches: None,
            worker_command: None,
        };

        let stats = Pipeline::new(config)
            .run(std::future::pending())
            .await
            .unwrap();

        // 250 records in pages of 40 -> 7 pages
        assert_eq!(stats.pages_read, 7);
        assert_eq!(stats.metrics.total_records, 250);
        assert!(!stats.has_failures());

        let summary = stats.summary.as_ref().unwrap();
        assert_eq!(summary.records_processed(), 250);
        assert_eq!(summary.batches_processed(), 7);
        assert_eq!(count_lines(dir.path()), 250);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_thread_pool_run_honours_max_batches() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            blueprint: blueprint(ClusterKind::ThreadPool, 1000, 10, dir.path().to_str().unwrap()),
            max_batches: Some(5),
            worker_command: None,
        };

        let stats = Pipeline::new(config)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.pages_read, 5);
        assert_eq!(stats.summary.as_ref().unwrap().records_processed(), 50);
        assert_eq!(count_lines(dir.path()), 50);
    }

    #[tokio::test]
    async fn test_shutdown_stops_paging_but_drains() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            blueprint: blueprint(ClusterKind::Cooperative, 1000, 10, dir.path().to_str().unwrap()),
            max_batches: None,
            worker_command: None,
        };

        let stats = Pipeline::new(config).run(async {}).await.unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.pages_read, 0);
        let summary = stats.summary.as_ref().unwrap();
        assert_eq!(summary.workers.len(), 3);
        assert!(summary.all_terminated());
    }

    #[tokio::test]
    async fn test_bad_sink_params_fail_before_start() {
        let mut bp = blueprint(ClusterKind::Cooperative, 10, 10, "unused");
        bp.sink.params.clear();

        let config = PipelineConfig {
            blueprint: bp,
            max_batches: None,
            worker_command: None,
        };

        let err = Pipeline::new(config)
            .run(std::future::pending())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to create sink"));
    }
}
