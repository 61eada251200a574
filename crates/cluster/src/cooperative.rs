//! Cooperative engine: every worker is a task on one dedicated scheduler thread
//!
//! The engine owns a current-thread runtime on its own OS thread, so workers
//! interleave at await points regardless of the caller's runtime flavor.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use contracts::{Batch, ClusterKind, ClusterSummary, WorkExecutor, WorkerId, WorkerReport};

use crate::channel::{task_channel, TaskSender};
use crate::engine::{
    collect_readiness, startup_error, summarize, Completion, DispatchEngine, Lifecycle, Readiness,
};
use crate::error::ClusterError;
use crate::factory::ClusterConfig;
use crate::round_robin::Lanes;
use crate::status::WorkerStatus;
use crate::worker::Worker;

/// Name of the thread driving every cooperative worker
pub const SCHEDULER_THREAD_NAME: &str = "cooperative-scheduler";

/// Single-threaded scheduler owned by one engine
///
/// Dropping it without [`Scheduler::shutdown`] still stops the thread; tasks
/// left on it are cancelled when its runtime drops.
struct Scheduler {
    handle: Handle,
    stop: oneshot::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl Scheduler {
    async fn start() -> Result<Self, ClusterError> {
        let (handle_tx, handle_rx) = oneshot::channel();
        let (stop, stop_rx) = oneshot::channel::<()>();

        // The runtime is built and dropped on its own thread; neither may
        // happen inside the caller's async context.
        let thread = thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        let _ = handle_tx.send(Ok(runtime.handle().clone()));
                        runtime.block_on(async {
                            let _ = stop_rx.await;
                        });
                    }
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                    }
                }
            })?;

        let handle = match handle_rx.await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(ClusterError::Io(e)),
            Err(_) => {
                return Err(ClusterError::Io(std::io::Error::other(
                    "scheduler thread exited during startup",
                )))
            }
        };

        debug!(thread = SCHEDULER_THREAD_NAME, "Cooperative scheduler started");
        Ok(Self {
            handle,
            stop,
            thread,
        })
    }

    fn spawn<F>(&self, worker: F) -> JoinHandle<WorkerReport>
    where
        F: Future<Output = WorkerReport> + Send + 'static,
    {
        self.handle.spawn(worker)
    }

    /// Stop the runtime and wait for its thread to exit
    async fn shutdown(self) {
        let _ = self.stop.send(());
        let thread = self.thread;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => debug!("Cooperative scheduler stopped"),
            Ok(Err(_)) => error!("Cooperative scheduler thread panicked"),
            Err(e) => error!(error = %e, "Failed to join cooperative scheduler"),
        }
    }
}

struct TaskCluster {
    lanes: Lanes<TaskSender>,
    handles: Vec<JoinHandle<WorkerReport>>,
    scheduler: Scheduler,
}

/// Workers are tasks sharing one single-threaded scheduler
///
/// Nothing crosses a thread or process boundary between workers, so batches
/// move without serialization. A worker blocking its thread blocks its
/// siblings too.
pub struct CooperativeEngine<E> {
    executor: Arc<E>,
    config: ClusterConfig,
    size: NonZeroUsize,
    statuses: Vec<Arc<WorkerStatus>>,
    lifecycle: Lifecycle<TaskCluster>,
}

impl<E> CooperativeEngine<E>
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

/// Send sentinels, join every task, then stop the scheduler
///
/// Workers listed as not ready are aborted instead of awaited.
async fn join_tasks(
    statuses: &[Arc<WorkerStatus>],
    mut cluster: TaskCluster,
    readiness: Option<&[Readiness]>,
) -> ClusterSummary {
    cluster.lanes.close().await;

    let mut reports = Vec::with_capacity(cluster.handles.len());
    for (i, handle) in cluster.handles.into_iter().enumerate() {
        let stuck = readiness
            .and_then(|r| r.get(i))
            .is_some_and(|r| !r.will_terminate());
        if stuck {
            handle.abort();
        }

        let report = match handle.await {
            Ok(report) => report,
            Err(e) if e.is_cancelled() => statuses[i].lost("did not become ready in time"),
            Err(e) => {
                error!(worker = i, error = %e, "Worker task panicked");
                statuses[i].lost(format!("worker task panicked: {e}"))
            }
        };
        reports.push(report);
    }
    cluster.scheduler.shutdown().await;

    summarize(ClusterKind::Cooperative, cluster.lanes.accepted(), reports)
}

impl<E> DispatchEngine for CooperativeEngine<E>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    fn kind(&self) -> ClusterKind {
        ClusterKind::Cooperative
    }

    fn cluster_size(&self) -> usize {
        self.size.get()
    }

    #[instrument(name = "cooperative_initialize", skip(self), fields(size = self.size.get()))]
    async fn initialize(&mut self) -> Result<(), ClusterError> {
        self.lifecycle.ensure_created(ClusterKind::Cooperative)?;

        let scheduler = match Scheduler::start().await {
            Ok(scheduler) => scheduler,
            Err(err) => {
                error!(error = %err, "Failed to start cooperative scheduler");
                let reports = self
                    .statuses
                    .iter()
                    .map(|status| status.lost(format!("never started: {err}")))
                    .collect();
                self.lifecycle
                    .complete(summarize(ClusterKind::Cooperative, 0, reports));
                return Err(err);
            }
        };

        let mut senders = Vec::with_capacity(self.size.get());
        let mut handles = Vec::with_capacity(self.size.get());
        let mut ready = Vec::with_capacity(self.size.get());

        for (i, status) in self.statuses.iter().enumerate() {
            let (tx, rx) = task_channel(i, self.config.channel_capacity);
            let (ready_tx, ready_rx) = oneshot::channel();
            let worker = Worker::new(WorkerId(i), Arc::clone(&self.executor), Arc::clone(status));

            handles.push(scheduler.spawn(worker.serve(rx, ready_tx)));
            senders.push(tx);
            ready.push(ready_rx);
        }

        let cluster = TaskCluster {
            lanes: Lanes::new(ClusterKind::Cooperative, senders)?,
            handles,
            scheduler,
        };

        let outcomes = collect_readiness(ready, self.config.startup_timeout).await;
        if let Some(err) = startup_error(&outcomes, self.config.startup_timeout) {
            error!(error = %err, "Cluster failed to start, tearing down");
            let summary = join_tasks(&self.statuses, cluster, Some(&outcomes)).await;
            self.lifecycle.complete(summary);
            return Err(err);
        }

        info!(size = self.size.get(), "Cooperative cluster ready");
        self.lifecycle = Lifecycle::Running(cluster);
        Ok(())
    }

    async fn dispatch(&mut self, batch: Batch) -> Result<usize, ClusterError> {
        let cluster = self.lifecycle.running_mut(ClusterKind::Cooperative)?;
        cluster.lanes.dispatch(batch).await
    }

    #[instrument(name = "cooperative_await_completion", skip(self))]
    async fn await_completion(&mut self) -> Result<ClusterSummary, ClusterError> {
        match self.lifecycle.begin_completion(ClusterKind::Cooperative)? {
            Completion::Done(summary) => Ok(summary),
            Completion::Join(cluster) => {
                let summary = join_tasks(&self.statuses, cluster, None).await;
                self.lifecycle.complete(summary.clone());
                Ok(summary)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContractError, Record, Value, WorkerState};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records (worker, event) pairs in call order
    #[derive(Default)]
    struct JournalExecutor {
        journal: Mutex<Vec<(usize, String)>>,
        refuse_worker: Option<usize>,
        hang_worker: Option<usize>,
    }

    impl JournalExecutor {
        fn log(&self, worker: usize, event: impl Into<String>) {
            self.journal.lock().unwrap().push((worker, event.into()));
        }

        fn events_of(&self, worker: usize) -> Vec<String> {
            self.journal
                .lock()
                .unwrap()
                .iter()
                .filter(|(w, _)| *w == worker)
                .map(|(_, e)| e.clone())
                .collect()
        }
    }

    impl WorkExecutor for JournalExecutor {
        type Connection = usize;

        fn name(&self) -> &str {
            "journal"
        }

        async fn connect(&self, worker: WorkerId) -> Result<usize, ContractError> {
            if self.hang_worker == Some(worker.index()) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.refuse_worker == Some(worker.index()) {
                return Err(ContractError::sink_connection("journal", "refused"));
            }
            self.log(worker.index(), "open");
            Ok(worker.index())
        }

        async fn execute(&self, batch: &Batch, worker: &mut usize) -> Result<(), ContractError> {
            let Value::Text(tag) = &batch.records()[0].fields()[0] else {
                return Err(ContractError::invalid_record("untagged batch"));
            };
            self.log(*worker, tag.clone());
            Ok(())
        }

        async fn close(&self, worker: usize) -> Result<(), ContractError> {
            self.log(worker, "close");
            Ok(())
        }
    }

    fn tagged(tag: &str) -> Batch {
        Batch::new(vec![Record::new(vec![Value::from(tag)])])
    }

    fn engine(executor: &Arc<JournalExecutor>, size: usize) -> CooperativeEngine<JournalExecutor> {
        CooperativeEngine::new(
            Arc::clone(executor),
            ClusterConfig::new(ClusterKind::Cooperative, size),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_six_batches_over_three_workers() {
        let executor = Arc::new(JournalExecutor::default());
        let mut engine = engine(&executor, 3);

        engine.initialize().await.unwrap();
        for i in 0..6 {
            engine.dispatch(tagged(&format!("B{i}"))).await.unwrap();
        }
        let summary = engine.await_completion().await.unwrap();

        assert_eq!(executor.events_of(0), vec!["open", "B0", "B3", "close"]);
        assert_eq!(executor.events_of(1), vec!["open", "B1", "B4", "close"]);
        assert_eq!(executor.events_of(2), vec!["open", "B2", "B5", "close"]);
        assert_eq!(summary.batches_dispatched, 6);
        assert_eq!(summary.batches_processed(), 6);
        assert!(summary.all_terminated());
        assert!(engine
            .worker_statuses()
            .iter()
            .all(|s| s.state() == WorkerState::Terminated));
    }

    #[tokio::test]
    async fn test_misuse_is_reported() {
        let executor = Arc::new(JournalExecutor::default());
        let mut engine = engine(&executor, 2);

        assert!(matches!(
            engine.dispatch(tagged("early")).await,
            Err(ClusterError::NotInitialized { .. })
        ));
        assert!(matches!(
            engine.await_completion().await,
            Err(ClusterError::NotInitialized { .. })
        ));

        engine.initialize().await.unwrap();
        assert!(matches!(
            engine.initialize().await,
            Err(ClusterError::AlreadyInitialized { .. })
        ));
        assert!(matches!(
            engine.dispatch(Batch::sentinel()).await,
            Err(ClusterError::EmptyBatch)
        ));

        let first = engine.await_completion().await.unwrap();
        let second = engine.await_completion().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(executor.events_of(0), vec!["open", "close"]);

        assert!(matches!(
            engine.dispatch(tagged("late")).await,
            Err(ClusterError::AlreadyCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn test_startup_failure_tears_down_cluster() {
        let executor = Arc::new(JournalExecutor {
            refuse_worker: Some(1),
            ..Default::default()
        });
        let mut engine = engine(&executor, 3);

        let err = engine.initialize().await.unwrap_err();
        assert!(matches!(err, ClusterError::WorkerStartup { worker: 1, .. }));

        // The healthy workers were drained and closed
        assert_eq!(executor.events_of(0), vec!["open", "close"]);
        assert_eq!(executor.events_of(2), vec!["open", "close"]);

        let summary = engine.await_completion().await.unwrap();
        assert_eq!(summary.failed_workers(), vec![1]);
        assert!(summary.workers[1].startup_error.is_some());
    }

    #[tokio::test]
    async fn test_startup_timeout_is_bounded() {
        let executor = Arc::new(JournalExecutor {
            hang_worker: Some(0),
            ..Default::default()
        });
        let config = ClusterConfig::new(ClusterKind::Cooperative, 2)
            .with_startup_timeout(Duration::from_millis(100));
        let mut engine = CooperativeEngine::new(Arc::clone(&executor), config).unwrap();

        let err = engine.initialize().await.unwrap_err();
        assert!(matches!(err, ClusterError::WorkerStartup { worker: 0, .. }));

        let summary = engine.await_completion().await.unwrap();
        assert!(summary.workers[0].fatal_error.is_some());
        assert!(summary.workers[1].is_healthy());
        assert_eq!(executor.events_of(1), vec!["open", "close"]);
    }

    /// Blocks its thread while executing and tracks how many executes overlap
    #[derive(Default)]
    struct BlockingExecutor {
        active: AtomicUsize,
        max_active: AtomicUsize,
        threads: Mutex<HashSet<std::thread::ThreadId>>,
        thread_names: Mutex<HashSet<Option<String>>>,
    }

    impl WorkExecutor for BlockingExecutor {
        type Connection = ();

        fn name(&self) -> &str {
            "blocking"
        }

        async fn connect(&self, _worker: WorkerId) -> Result<(), ContractError> {
            Ok(())
        }

        async fn execute(&self, _batch: &Batch, _connection: &mut ()) -> Result<(), ContractError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let current = std::thread::current();
            self.threads.lock().unwrap().insert(current.id());
            self.thread_names
                .lock()
                .unwrap()
                .insert(current.name().map(str::to_string));

            std::thread::sleep(Duration::from_millis(100));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self, _connection: ()) -> Result<(), ContractError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_share_one_thread_on_a_multi_thread_caller() {
        let executor = Arc::new(BlockingExecutor::default());
        let config = ClusterConfig::new(ClusterKind::Cooperative, 4);
        let mut engine = CooperativeEngine::new(Arc::clone(&executor), config).unwrap();

        engine.initialize().await.unwrap();
        for i in 0..8 {
            engine.dispatch(tagged(&format!("B{i}"))).await.unwrap();
        }
        let summary = engine.await_completion().await.unwrap();

        assert_eq!(summary.batches_processed(), 8);
        assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(executor.threads.lock().unwrap().len(), 1);
        assert_eq!(
            *executor.thread_names.lock().unwrap(),
            HashSet::from([Some(SCHEDULER_THREAD_NAME.to_string())])
        );
    }
}
