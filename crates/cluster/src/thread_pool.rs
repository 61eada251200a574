//! Thread-pool engine: one OS thread per worker
//!
//! Each thread builds its own current-thread runtime before it opens the sink
//! connection, so a worker blocking in the executor only stalls itself.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

use contracts::{Batch, ClusterKind, ClusterSummary, WorkExecutor, WorkerId, WorkerReport};

use crate::channel::{thread_channel, ThreadReceiver, ThreadSender};
use crate::engine::{
    collect_readiness, never_spawned, startup_error, summarize, Completion, DispatchEngine,
    Lifecycle, Readiness,
};
use crate::error::ClusterError;
use crate::factory::ClusterConfig;
use crate::round_robin::Lanes;
use crate::status::WorkerStatus;
use crate::worker::{ReadySender, Worker};

struct ThreadCluster {
    lanes: Lanes<ThreadSender>,
    threads: Vec<thread::JoinHandle<WorkerReport>>,
}

/// Workers are named OS threads (`worker-0`, `worker-1`, ...)
pub struct ThreadPoolEngine<E> {
    executor: Arc<E>,
    config: ClusterConfig,
    size: NonZeroUsize,
    statuses: Vec<Arc<WorkerStatus>>,
    lifecycle: Lifecycle<ThreadCluster>,
}

impl<E> ThreadPoolEngine<E>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    pub fn new(executor: Arc<E>, config: ClusterConfig) -> Result<Self, ClusterError> {
        let size = config.validate()?;
        let statuses = (0..size.get())
            .map(|i| Arc::new(WorkerStatus::new(WorkerId(i))))
            .collect();
        Ok(Self {
            executor,
            config,
            size,
            statuses,
            lifecycle: Lifecycle::Created,
        })
    }

    pub fn worker_statuses(&self) -> &[Arc<WorkerStatus>] {
        &self.statuses
    }
}

/// Thread body: private runtime, then the shared worker loop
fn worker_thread<E>(worker: Worker<E>, rx: ThreadReceiver, ready: ReadySender) -> WorkerReport
where
    E: WorkExecutor + Send + Sync + 'static,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let message = format!("failed to build worker runtime: {e}");
            error!(worker = %worker.id(), error = %e, "Failed to build worker runtime");
            let _ = ready.send(Err(message.clone()));
            return worker.abandon(message);
        }
    };

    runtime.block_on(worker.serve(rx, ready))
}

/// Send sentinels, then join every thread
///
/// Threads that never became ready are detached; they exit on their own once
/// their connect attempt returns and they find the channel closed.
async fn join_threads(
    statuses: &[Arc<WorkerStatus>],
    mut cluster: ThreadCluster,
    readiness: Option<&[Readiness]>,
) -> ClusterSummary {
    cluster.lanes.close().await;

    let mut reports = Vec::with_capacity(cluster.threads.len());
    for (i, handle) in cluster.threads.into_iter().enumerate() {
        let stuck = readiness
            .and_then(|r| r.get(i))
            .is_some_and(|r| !r.will_terminate());
        if stuck {
            warn!(worker = i, "Detaching worker thread that never became ready");
            drop(handle);
            reports.push(statuses[i].lost("did not become ready in time"));
            continue;
        }

        let report = match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(report)) => report,
            Ok(Err(_)) => {
                error!(worker = i, "Worker thread panicked");
                statuses[i].lost("worker thread panicked")
            }
            Err(e) => statuses[i].lost(format!("failed to join worker thread: {e}")),
        };
        reports.push(report);
    }
    reports.extend(never_spawned(&statuses[reports.len()..]));

    summarize(ClusterKind::ThreadPool, cluster.lanes.accepted(), reports)
}

/// Tear down after thread `threads.len()` could not be spawned
///
/// The threads already running get the usual bounded readiness wait first, so
/// one stuck in `connect` is detached rather than joined.
async fn abandon_partial_cluster(
    statuses: &[Arc<WorkerStatus>],
    senders: Vec<ThreadSender>,
    threads: Vec<thread::JoinHandle<WorkerReport>>,
    ready: Vec<oneshot::Receiver<Result<(), String>>>,
    startup_timeout: Duration,
) -> ClusterSummary {
    let outcomes = collect_readiness(ready, startup_timeout).await;
    match Lanes::new(ClusterKind::ThreadPool, senders) {
        Ok(lanes) => join_threads(statuses, ThreadCluster { lanes, threads }, Some(&outcomes)).await,
        Err(_) => summarize(ClusterKind::ThreadPool, 0, never_spawned(statuses)),
    }
}

impl<E> DispatchEngine for ThreadPoolEngine<E>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    fn kind(&self) -> ClusterKind {
        ClusterKind::ThreadPool
    }

    fn cluster_size(&self) -> usize {
        self.size.get()
    }

    #[instrument(name = "thread_pool_initialize", skip(self), fields(size = self.size.get()))]
    async fn initialize(&mut self) -> Result<(), ClusterError> {
        self.lifecycle.ensure_created(ClusterKind::ThreadPool)?;

        let mut senders = Vec::with_capacity(self.size.get());
        let mut threads = Vec::with_capacity(self.size.get());
        let mut ready = Vec::with_capacity(self.size.get());
        let mut spawn_error = None;

        for (i, status) in self.statuses.iter().enumerate() {
            let (tx, rx) = thread_channel(i, self.config.channel_capacity);
            let (ready_tx, ready_rx) = oneshot::channel();
            let worker = Worker::new(WorkerId(i), Arc::clone(&self.executor), Arc::clone(status));

            let spawned = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || worker_thread(worker, rx, ready_tx));

            match spawned {
                Ok(handle) => {
                    senders.push(tx);
                    threads.push(handle);
                    ready.push(ready_rx);
                }
                Err(e) => {
                    spawn_error = Some(ClusterError::Spawn {
                        worker: i,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Some(err) = spawn_error {
            error!(error = %err, "Failed to spawn worker thread, tearing down");
            let summary = abandon_partial_cluster(
                &self.statuses,
                senders,
                threads,
                ready,
                self.config.startup_timeout,
            )
            .await;
            self.lifecycle.complete(summary);
            return Err(err);
        }

        let cluster = ThreadCluster {
            lanes: Lanes::new(ClusterKind::ThreadPool, senders)?,
            threads,
        };

        let outcomes = collect_readiness(ready, self.config.startup_timeout).await;
        if let Some(err) = startup_error(&outcomes, self.config.startup_timeout) {
            error!(error = %err, "Cluster failed to start, tearing down");
            let summary = join_threads(&self.statuses, cluster, Some(&outcomes)).await;
            self.lifecycle.complete(summary);
            return Err(err);
        }

        info!(size = self.size.get(), "Thread-pool cluster ready");
        self.lifecycle = Lifecycle::Running(cluster);
        Ok(())
    }

    async fn dispatch(&mut self, batch: Batch) -> Result<usize, ClusterError> {
        let cluster = self.lifecycle.running_mut(ClusterKind::ThreadPool)?;
        cluster.lanes.dispatch(batch).await
    }

    #[instrument(name = "thread_pool_await_completion", skip(self))]
    async fn await_completion(&mut self) -> Result<ClusterSummary, ClusterError> {
        match self.lifecycle.begin_completion(ClusterKind::ThreadPool)? {
            Completion::Done(summary) => Ok(summary),
            Completion::Join(cluster) => {
                let summary = join_threads(&self.statuses, cluster, None).await;
                self.lifecycle.complete(summary.clone());
                Ok(summary)
            }
        }
    }
}
