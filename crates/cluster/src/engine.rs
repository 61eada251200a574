//! Dispatch engine contract and the shared lifecycle around it

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::warn;

use contracts::{Batch, ClusterKind, ClusterSummary, WorkExecutor, WorkerReport};

use crate::cooperative::CooperativeEngine;
use crate::error::ClusterError;
use crate::process_pool::ProcessPoolEngine;
use crate::status::WorkerStatus;
use crate::thread_pool::ThreadPoolEngine;

/// Uniform interface over every concurrency substrate
#[trait_variant::make(DispatchEngine: Send)]
pub trait LocalDispatchEngine {
    fn kind(&self) -> ClusterKind;

    fn cluster_size(&self) -> usize;

    /// Create the channels and start every worker
    ///
    /// Waits until each worker has opened its sink connection. If any worker
    /// fails to start, or does not report within the startup timeout, the
    /// whole cluster is torn down and `WorkerStartup` is returned.
    async fn initialize(&mut self) -> Result<(), ClusterError>;

    /// Send `batch` to the next worker in round-robin order
    ///
    /// Returns the index of the worker that received it. May wait while that
    /// worker's channel is full.
    async fn dispatch(&mut self, batch: Batch) -> Result<usize, ClusterError>;

    /// Send the sentinel to every worker and join them all
    ///
    /// Calling it again returns the same summary.
    async fn await_completion(&mut self) -> Result<ClusterSummary, ClusterError>;
}

/// Engine selected by the factory
pub enum Engine<E> {
    Cooperative(CooperativeEngine<E>),
    ThreadPool(ThreadPoolEngine<E>),
    ProcessPool(ProcessPoolEngine),
}

impl<E> Engine<E>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    /// Live per-worker status, indexed by worker
    pub fn worker_statuses(&self) -> &[Arc<WorkerStatus>] {
        match self {
            Self::Cooperative(engine) => engine.worker_statuses(),
            Self::ThreadPool(engine) => engine.worker_statuses(),
            Self::ProcessPool(engine) => engine.worker_statuses(),
        }
    }
}

impl<E> DispatchEngine for Engine<E>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    fn kind(&self) -> ClusterKind {
        match self {
            Self::Cooperative(engine) => DispatchEngine::kind(engine),
            Self::ThreadPool(engine) => DispatchEngine::kind(engine),
            Self::ProcessPool(engine) => DispatchEngine::kind(engine),
        }
    }

    fn cluster_size(&self) -> usize {
        match self {
            Self::Cooperative(engine) => DispatchEngine::cluster_size(engine),
            Self::ThreadPool(engine) => DispatchEngine::cluster_size(engine),
            Self::ProcessPool(engine) => DispatchEngine::cluster_size(engine),
        }
    }

    async fn initialize(&mut self) -> Result<(), ClusterError> {
        match self {
            Self::Cooperative(engine) => DispatchEngine::initialize(engine).await,
            Self::ThreadPool(engine) => DispatchEngine::initialize(engine).await,
            Self::ProcessPool(engine) => DispatchEngine::initialize(engine).await,
        }
    }

    async fn dispatch(&mut self, batch: Batch) -> Result<usize, ClusterError> {
        match self {
            Self::Cooperative(engine) => DispatchEngine::dispatch(engine, batch).await,
            Self::ThreadPool(engine) => DispatchEngine::dispatch(engine, batch).await,
            Self::ProcessPool(engine) => DispatchEngine::dispatch(engine, batch).await,
        }
    }

    async fn await_completion(&mut self) -> Result<ClusterSummary, ClusterError> {
        match self {
            Self::Cooperative(engine) => DispatchEngine::await_completion(engine).await,
            Self::ThreadPool(engine) => DispatchEngine::await_completion(engine).await,
            Self::ProcessPool(engine) => DispatchEngine::await_completion(engine).await,
        }
    }
}

/// Where an engine instance is in its single run
pub(crate) enum Lifecycle<R> {
    Created,
    Running(R),
    Completed(ClusterSummary),
}

/// What `await_completion` has to do
pub(crate) enum Completion<R> {
    Join(R),
    Done(ClusterSummary),
}

impl<R> Lifecycle<R> {
    pub(crate) fn ensure_created(&self, kind: ClusterKind) -> Result<(), ClusterError> {
        match self {
            Self::Created => Ok(()),
            _ => Err(ClusterError::AlreadyInitialized { kind }),
        }
    }

    pub(crate) fn running_mut(&mut self, kind: ClusterKind) -> Result<&mut R, ClusterError> {
        match self {
            Self::Created => Err(ClusterError::NotInitialized { kind }),
            Self::Running(cluster) => Ok(cluster),
            Self::Completed(_) => Err(ClusterError::AlreadyCompleted { kind }),
        }
    }

    /// Take the running cluster out for joining, or hand back the cached summary
    pub(crate) fn begin_completion(
        &mut self,
        kind: ClusterKind,
    ) -> Result<Completion<R>, ClusterError> {
        match std::mem::replace(self, Self::Created) {
            Self::Created => Err(ClusterError::NotInitialized { kind }),
            Self::Running(cluster) => Ok(Completion::Join(cluster)),
            Self::Completed(summary) => {
                *self = Self::Completed(summary.clone());
                Ok(Completion::Done(summary))
            }
        }
    }

    pub(crate) fn complete(&mut self, summary: ClusterSummary) {
        *self = Self::Completed(summary);
    }
}

/// Outcome of one worker's STARTING phase as seen by the engine
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Readiness {
    Ready,
    Failed(String),
    TimedOut,
}

impl Readiness {
    /// Whether the worker can be joined normally
    pub(crate) fn will_terminate(&self) -> bool {
        !matches!(self, Self::TimedOut)
    }
}

/// Wait for every readiness signal against one shared deadline
pub(crate) async fn collect_readiness(
    receivers: Vec<oneshot::Receiver<Result<(), String>>>,
    timeout: Duration,
) -> Vec<Readiness> {
    let deadline = Instant::now() + timeout;
    let mut outcomes = Vec::with_capacity(receivers.len());

    for receiver in receivers {
        let outcome = match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(Ok(()))) => Readiness::Ready,
            Ok(Ok(Err(message))) => Readiness::Failed(message),
            Ok(Err(_)) => Readiness::Failed("worker exited before reporting readiness".into()),
            Err(_) => Readiness::TimedOut,
        };
        outcomes.push(outcome);
    }
    outcomes
}

/// First startup failure, if any
pub(crate) fn startup_error(outcomes: &[Readiness], timeout: Duration) -> Option<ClusterError> {
    outcomes
        .iter()
        .enumerate()
        .find_map(|(worker, outcome)| match outcome {
            Readiness::Ready => None,
            Readiness::Failed(message) => Some(ClusterError::worker_startup(worker, message)),
            Readiness::TimedOut => Some(ClusterError::worker_startup(
                worker,
                format!("not ready after {}s", timeout.as_secs_f64()),
            )),
        })
}

/// Reports for workers whose execution unit was never created
pub(crate) fn never_spawned(statuses: &[Arc<WorkerStatus>]) -> Vec<WorkerReport> {
    statuses
        .iter()
        .map(|status| status.lost("never spawned"))
        .collect()
}

/// Assemble the summary and export it
pub(crate) fn summarize(
    kind: ClusterKind,
    batches_dispatched: u64,
    workers: Vec<WorkerReport>,
) -> ClusterSummary {
    let summary = ClusterSummary {
        kind,
        cluster_size: workers.len(),
        batches_dispatched,
        workers,
    };

    let failed = summary.failed_workers();
    if !failed.is_empty() {
        warn!(kind = %kind, workers = ?failed, "Workers did not terminate cleanly");
    }
    observability::record_cluster_summary(&summary);
    summary
}
