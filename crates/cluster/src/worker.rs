//! Worker state machine
//!
//! `Starting -> Waiting <-> Processing -> Draining -> Terminated`. The same loop
//! runs on every substrate; only the receiver type and the execution unit
//! differ.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use contracts::{WorkExecutor, WorkerId, WorkerReport, WorkerState};

use crate::channel::BatchReceiver;
use crate::status::WorkerStatus;

/// Readiness signal sent once STARTING is over
pub type ReadySender = oneshot::Sender<Result<(), String>>;

/// A worker that has not opened its sink connection yet
pub struct Worker<E> {
    id: WorkerId,
    executor: Arc<E>,
    status: Arc<WorkerStatus>,
}

impl<E> Worker<E>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    pub fn new(id: WorkerId, executor: Arc<E>, status: Arc<WorkerStatus>) -> Self {
        Self {
            id,
            executor,
            status,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// STARTING: open the dedicated sink connection
    ///
    /// On failure the worker goes straight to `Terminated` and the returned
    /// report carries the startup error.
    #[instrument(name = "worker_start", skip(self), fields(worker = %self.id))]
    pub async fn start(self) -> Result<RunningWorker<E>, WorkerReport> {
        self.status.set_state(WorkerState::Starting);

        match self.executor.connect(self.id).await {
            Ok(connection) => {
                self.status.set_state(WorkerState::Waiting);
                debug!(worker = %self.id, sink = self.executor.name(), "Sink connection opened");
                Ok(RunningWorker {
                    id: self.id,
                    executor: self.executor,
                    status: self.status,
                    connection,
                })
            }
            Err(e) => {
                error!(worker = %self.id, error = %e, "Failed to open sink connection");
                Err(self.abandon(e.to_string()))
            }
        }
    }

    /// Terminate before a connection was ever opened
    pub fn abandon(self, reason: impl Into<String>) -> WorkerReport {
        self.status.set_state(WorkerState::Terminated);
        let mut report = self.status.report();
        report.startup_error = Some(reason.into());
        report
    }

    /// Start, report readiness, then run until drained
    pub async fn serve<R>(self, rx: R, ready: ReadySender) -> WorkerReport
    where
        R: BatchReceiver + Send,
    {
        match self.start().await {
            Ok(running) => {
                // The engine may already have given up waiting
                let _ = ready.send(Ok(()));
                running.run(rx).await
            }
            Err(report) => {
                let message = report.startup_error.clone().unwrap_or_default();
                let _ = ready.send(Err(message));
                report
            }
        }
    }
}

/// A worker holding an open sink connection
pub struct RunningWorker<E: WorkExecutor> {
    id: WorkerId,
    executor: Arc<E>,
    status: Arc<WorkerStatus>,
    connection: E::Connection,
}

impl<E> RunningWorker<E>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    /// WAITING / PROCESSING loop, then DRAINING and TERMINATED
    ///
    /// Returns after the sentinel, or when the channel closes without one.
    /// The connection is closed exactly once on the way out.
    #[instrument(name = "worker_loop", skip(self, rx), fields(worker = %self.id))]
    pub async fn run<R>(mut self, mut rx: R) -> WorkerReport
    where
        R: BatchReceiver + Send,
    {
        let id = self.id;
        loop {
            let batch = match rx.recv().await {
                Some(Ok(batch)) => batch,
                Some(Err(e)) => {
                    self.status.inc_failed(0, e.to_string());
                    error!(worker = %id, error = %e, "Undecodable batch");
                    continue;
                }
                None => {
                    warn!(worker = %id, "Channel closed without sentinel");
                    break;
                }
            };

            if batch.is_sentinel() {
                debug!(worker = %id, "Sentinel received");
                break;
            }

            self.status.set_state(WorkerState::Processing);
            match self.executor.execute(&batch, &mut self.connection).await {
                Ok(()) => self.status.inc_processed(batch.len()),
                Err(e) => {
                    self.status.inc_failed(batch.len(), e.to_string());
                    error!(
                        worker = %id,
                        records = batch.len(),
                        error = %e,
                        "Batch failed"
                    );
                }
            }
            self.status.set_state(WorkerState::Waiting);
        }

        self.finish().await
    }

    /// Give up without taking any batch, still closing the connection
    pub async fn abort(self, reason: impl Into<String>) -> WorkerReport {
        let mut report = self.finish().await;
        report.fatal_error.get_or_insert_with(|| reason.into());
        report
    }

    /// DRAINING and TERMINATED
    async fn finish(self) -> WorkerReport {
        let Self {
            id,
            executor,
            status,
            connection,
        } = self;

        status.set_state(WorkerState::Draining);
        let close_error = executor.close(connection).await.err();
        status.set_state(WorkerState::Terminated);

        let mut report = status.report();
        if let Some(e) = close_error {
            error!(worker = %id, error = %e, "Failed to close sink connection");
            report.fatal_error = Some(format!("close failed: {e}"));
        }

        info!(
            worker = %id,
            processed = report.batches_processed,
            failed = report.batches_failed,
            records = report.records_processed,
            "Worker terminated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{task_channel, BatchSender};
    use contracts::{Batch, ContractError, Record, Value};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Executor that fails batches whose first field is negative
    #[derive(Default)]
    struct PickyExecutor {
        opened: AtomicU64,
        closed: AtomicU64,
        refuse_connect: bool,
    }

    impl WorkExecutor for PickyExecutor {
        type Connection = Vec<i64>;

        fn name(&self) -> &str {
            "picky"
        }

        async fn connect(&self, _worker: WorkerId) -> Result<Self::Connection, ContractError> {
            if self.refuse_connect {
                return Err(ContractError::sink_connection("picky", "refused"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn execute(
            &self,
            batch: &Batch,
            connection: &mut Self::Connection,
        ) -> Result<(), ContractError> {
            match batch.records()[0].fields()[0] {
                Value::Int(n) if n < 0 => Err(ContractError::sink_write("picky", "negative")),
                Value::Int(n) => {
                    connection.push(n);
                    Ok(())
                }
                _ => Err(ContractError::sink_write("picky", "not an int")),
            }
        }

        async fn close(&self, _connection: Self::Connection) -> Result<(), ContractError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn batch(n: i64) -> Batch {
        Batch::new(vec![Record::new(vec![Value::Int(n)]), Record::new(vec![Value::Int(0)])])
    }

    fn worker(executor: &Arc<PickyExecutor>) -> (Worker<PickyExecutor>, Arc<WorkerStatus>) {
        let status = Arc::new(WorkerStatus::new(WorkerId(0)));
        (
            Worker::new(WorkerId(0), Arc::clone(executor), Arc::clone(&status)),
            status,
        )
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_worker() {
        let executor = Arc::new(PickyExecutor::default());
        let (worker, status) = worker(&executor);
        let (mut tx, rx) = task_channel(0, 8);

        tx.send(batch(1)).await.unwrap();
        tx.send(batch(-1)).await.unwrap();
        tx.send(batch(2)).await.unwrap();
        tx.send(Batch::sentinel()).await.unwrap();

        let running = worker.start().await.unwrap();
        let report = running.run(rx).await;

        assert_eq!(report.state, WorkerState::Terminated);
        assert_eq!(report.batches_processed, 2);
        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.records_processed, 4);
        assert!(report.last_error.unwrap().contains("negative"));
        assert_eq!(status.state(), WorkerState::Terminated);
        assert_eq!(executor.opened.load(Ordering::SeqCst), 1);
        assert_eq!(executor.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batches_after_sentinel_are_not_processed() {
        let executor = Arc::new(PickyExecutor::default());
        let (worker, _) = worker(&executor);
        let (mut tx, rx) = task_channel(0, 8);

        tx.send(batch(1)).await.unwrap();
        tx.send(Batch::sentinel()).await.unwrap();
        tx.send(batch(2)).await.unwrap();

        let report = worker.start().await.unwrap().run(rx).await;
        assert_eq!(report.batches_received(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_drains_like_sentinel() {
        let executor = Arc::new(PickyExecutor::default());
        let (worker, _) = worker(&executor);
        let (mut tx, rx) = task_channel(0, 8);

        tx.send(batch(5)).await.unwrap();
        drop(tx);

        let report = worker.start().await.unwrap().run(rx).await;
        assert_eq!(report.batches_processed, 1);
        assert_eq!(executor.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_startup_failure_terminates_without_processing() {
        let executor = Arc::new(PickyExecutor {
            refuse_connect: true,
            ..Default::default()
        });
        let (worker, status) = worker(&executor);
        let (_tx, rx) = task_channel(0, 8);
        let (ready_tx, ready_rx) = oneshot::channel();

        let report = worker.serve(rx, ready_tx).await;

        assert!(ready_rx.await.unwrap().is_err());
        assert_eq!(report.state, WorkerState::Terminated);
        assert!(report.startup_error.as_ref().unwrap().contains("refused"));
        assert_eq!(report.batches_received(), 0);
        assert_eq!(status.state(), WorkerState::Terminated);
        assert_eq!(executor.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_closes_connection_once() {
        let executor = Arc::new(PickyExecutor::default());
        let (worker, status) = worker(&executor);

        let report = worker.start().await.unwrap().abort("parent went away").await;

        assert_eq!(report.state, WorkerState::Terminated);
        assert_eq!(report.fatal_error.as_deref(), Some("parent went away"));
        assert_eq!(report.batches_received(), 0);
        assert_eq!(status.state(), WorkerState::Terminated);
        assert_eq!(executor.closed.load(Ordering::SeqCst), 1);
    }
}
