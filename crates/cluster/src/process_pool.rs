//! Process-pool engine: one child process per worker
//!
//! Batches travel as frames on the child's stdin; the child answers on its
//! stdout with [`WorkerEvent`] frames. The child's stderr is inherited so its
//! logs end up next to the parent's.
//!
//! The child cannot share the parent's runtime or executor. It builds both
//! itself and then calls [`serve_process_worker`].

use std::num::NonZeroUsize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    Batch, ClusterKind, ClusterSummary, WorkExecutor, WorkerId, WorkerReport, WorkerState,
};

use crate::channel::{PipeReceiver, PipeSender};
use crate::codec;
use crate::engine::{
    collect_readiness, never_spawned, startup_error, summarize, Completion, DispatchEngine,
    Lifecycle, Readiness,
};
use crate::error::ClusterError;
use crate::factory::{ClusterConfig, WorkerCommand};
use crate::round_robin::Lanes;
use crate::status::WorkerStatus;
use crate::worker::Worker;

/// Environment variable carrying the worker index into the child
pub const WORKER_INDEX_ENV: &str = "MIGRATOR_WORKER_INDEX";

/// Child-to-parent messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// Sink connection open, waiting for batches
    Ready,
    /// Sink connection could not be opened
    StartupFailed { message: String },
    /// Final report, last frame before exit
    Finished(WorkerReport),
}

struct ChildWorker {
    index: usize,
    child: Child,
    events: JoinHandle<Option<WorkerReport>>,
}

struct ProcessCluster {
    lanes: Lanes<PipeSender<ChildStdin>>,
    children: Vec<ChildWorker>,
}

/// Workers are child processes launched from a [`WorkerCommand`]
pub struct ProcessPoolEngine {
    config: ClusterConfig,
    command: WorkerCommand,
    size: NonZeroUsize,
    statuses: Vec<Arc<WorkerStatus>>,
    lifecycle: Lifecycle<ProcessCluster>,
}

impl ProcessPoolEngine {
    pub fn new(config: ClusterConfig) -> Result<Self, ClusterError> {
        let size = config.validate()?;
        let command = config
            .worker_command
            .clone()
            .ok_or_else(|| ClusterError::configuration("process pool needs a worker command"))?;
        let statuses = (0..size.get())
            .map(|i| Arc::new(WorkerStatus::new(WorkerId(i))))
            .collect();
        Ok(Self {
            config,
            command,
            size,
            statuses,
            lifecycle: Lifecycle::Created,
        })
    }

    /// Status as last reported over each pipe
    pub fn worker_statuses(&self) -> &[Arc<WorkerStatus>] {
        &self.statuses
    }

    fn spawn_child(
        &self,
        index: usize,
        ready: oneshot::Sender<Result<(), String>>,
    ) -> Result<(PipeSender<ChildStdin>, ChildWorker), ClusterError> {
        let spawn_error = |message: String| ClusterError::Spawn {
            worker: index,
            message,
        };

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .envs(self.command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(WORKER_INDEX_ENV, index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(format!("{}: {e}", self.command.program.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("child stdin is not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("child stdout is not piped".into()))?;

        debug!(worker = index, pid = ?child.id(), "Worker process spawned");

        let status = Arc::clone(&self.statuses[index]);
        let events = tokio::spawn(forward_events(WorkerId(index), stdout, ready, status));

        Ok((
            PipeSender::new(index, stdin, Arc::clone(&self.statuses[index])),
            ChildWorker {
                index,
                child,
                events,
            },
        ))
    }
}

/// Read a child's events until it reports its final state or goes away
async fn forward_events(
    worker: WorkerId,
    stdout: ChildStdout,
    ready: oneshot::Sender<Result<(), String>>,
    status: Arc<WorkerStatus>,
) -> Option<WorkerReport> {
    let mut reader = BufReader::new(stdout);
    let mut ready = Some(ready);

    loop {
        let payload = match codec::read_frame(&mut reader).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                error!(worker = %worker, error = %e, "Event pipe broken");
                return None;
            }
        };

        match codec::decode::<WorkerEvent>(&payload) {
            Ok(WorkerEvent::Ready) => {
                status.set_state(WorkerState::Waiting);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(WorkerEvent::StartupFailed { message }) => {
                status.set_state(WorkerState::Terminated);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(message));
                }
            }
            Ok(WorkerEvent::Finished(report)) => return Some(status.absorb(&report)),
            Err(e) => warn!(worker = %worker, error = %e, "Undecodable worker event"),
        }
    }
}

/// Send sentinels, close every stdin, then reap every child
///
/// Children that never became ready are killed.
async fn join_children(
    statuses: &[Arc<WorkerStatus>],
    mut cluster: ProcessCluster,
    readiness: Option<&[Readiness]>,
) -> ClusterSummary {
    cluster.lanes.close().await;

    let mut reports = Vec::with_capacity(cluster.children.len());
    for ChildWorker {
        index,
        mut child,
        events,
    } in cluster.children
    {
        let stuck = readiness
            .and_then(|r| r.get(index))
            .is_some_and(|r| !r.will_terminate());
        if stuck {
            warn!(worker = index, "Killing worker process that never became ready");
            if let Err(e) = child.start_kill() {
                warn!(worker = index, error = %e, "Failed to kill worker process");
            }
        }

        let report = match events.await {
            Ok(report) => report,
            Err(e) => {
                error!(worker = index, error = %e, "Event reader task failed");
                None
            }
        };

        let report = match (report, child.wait().await) {
            (Some(report), Ok(exit)) if exit.success() => report,
            (Some(mut report), Ok(exit)) => {
                report.fatal_error = Some(format!("worker process exited with {exit}"));
                report
            }
            (None, Ok(exit)) if stuck => {
                statuses[index].lost(format!("did not become ready in time ({exit})"))
            }
            (None, Ok(exit)) => {
                statuses[index].lost(format!("worker process exited with {exit} before reporting"))
            }
            (_, Err(e)) => statuses[index].lost(format!("failed to reap worker process: {e}")),
        };
        reports.push(report);
    }
    reports.extend(never_spawned(&statuses[reports.len()..]));

    summarize(ClusterKind::ProcessPool, cluster.lanes.accepted(), reports)
}

/// Tear down after child `children.len()` could not be spawned
///
/// Children already running get the usual bounded readiness wait first, so
/// one stuck in `connect` is killed rather than awaited.
async fn abandon_partial_cluster(
    statuses: &[Arc<WorkerStatus>],
    senders: Vec<PipeSender<ChildStdin>>,
    children: Vec<ChildWorker>,
    ready: Vec<oneshot::Receiver<Result<(), String>>>,
    startup_timeout: Duration,
) -> ClusterSummary {
    let outcomes = collect_readiness(ready, startup_timeout).await;
    match Lanes::new(ClusterKind::ProcessPool, senders) {
        Ok(lanes) => {
            let cluster = ProcessCluster { lanes, children };
            join_children(statuses, cluster, Some(&outcomes)).await
        }
        Err(_) => summarize(ClusterKind::ProcessPool, 0, never_spawned(statuses)),
    }
}

impl DispatchEngine for ProcessPoolEngine {
    fn kind(&self) -> ClusterKind {
        ClusterKind::ProcessPool
    }

    fn cluster_size(&self) -> usize {
        self.size.get()
    }

    #[instrument(name = "process_pool_initialize", skip(self), fields(size = self.size.get()))]
    async fn initialize(&mut self) -> Result<(), ClusterError> {
        self.lifecycle.ensure_created(ClusterKind::ProcessPool)?;

        let mut senders = Vec::with_capacity(self.size.get());
        let mut children = Vec::with_capacity(self.size.get());
        let mut ready = Vec::with_capacity(self.size.get());
        let mut spawn_error = None;

        for index in 0..self.size.get() {
            let (ready_tx, ready_rx) = oneshot::channel();
            match self.spawn_child(index, ready_tx) {
                Ok((sender, child)) => {
                    senders.push(sender);
                    children.push(child);
                    ready.push(ready_rx);
                }
                Err(e) => {
                    spawn_error = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = spawn_error {
            error!(error = %err, "Failed to spawn worker process, tearing down");
            let summary = abandon_partial_cluster(
                &self.statuses,
                senders,
                children,
                ready,
                self.config.startup_timeout,
            )
            .await;
            self.lifecycle.complete(summary);
            return Err(err);
        }

        let cluster = ProcessCluster {
            lanes: Lanes::new(ClusterKind::ProcessPool, senders)?,
            children,
        };

        let outcomes = collect_readiness(ready, self.config.startup_timeout).await;
        if let Some(err) = startup_error(&outcomes, self.config.startup_timeout) {
            error!(error = %err, "Cluster failed to start, tearing down");
            let summary = join_children(&self.statuses, cluster, Some(&outcomes)).await;
            self.lifecycle.complete(summary);
            return Err(err);
        }

        info!(size = self.size.get(), "Process-pool cluster ready");
        self.lifecycle = Lifecycle::Running(cluster);
        Ok(())
    }

    async fn dispatch(&mut self, batch: Batch) -> Result<usize, ClusterError> {
        let cluster = self.lifecycle.running_mut(ClusterKind::ProcessPool)?;
        cluster.lanes.dispatch(batch).await
    }

    #[instrument(name = "process_pool_await_completion", skip(self))]
    async fn await_completion(&mut self) -> Result<ClusterSummary, ClusterError> {
        match self.lifecycle.begin_completion(ClusterKind::ProcessPool)? {
            Completion::Done(summary) => Ok(summary),
            Completion::Join(cluster) => {
                let summary = join_children(&self.statuses, cluster, None).await;
                self.lifecycle.complete(summary.clone());
                Ok(summary)
            }
        }
    }
}

/// Child-side entry point over the process's own stdin/stdout
///
/// Must run inside the child's own runtime. Nothing else may write to stdout.
pub async fn serve_process_worker<E>(
    executor: Arc<E>,
    index: usize,
) -> Result<WorkerReport, ClusterError>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    serve_pipe(
        executor,
        index,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Run one worker over an arbitrary pair of byte streams
#[instrument(name = "process_worker", skip(executor, input, output), fields(worker = index))]
pub async fn serve_pipe<E, R, W>(
    executor: Arc<E>,
    index: usize,
    input: R,
    mut output: W,
) -> Result<WorkerReport, ClusterError>
where
    E: WorkExecutor + Send + Sync + 'static,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let id = WorkerId(index);
    let status = Arc::new(WorkerStatus::new(id));
    let worker = Worker::new(id, executor, status);

    let report = match worker.start().await {
        Ok(running) => {
            if let Err(e) = codec::write_frame(&mut output, &WorkerEvent::Ready).await {
                error!(worker = index, error = %e, "Failed to announce readiness");
                running.abort(format!("readiness not delivered: {e}")).await;
                return Err(e);
            }
            running.run(PipeReceiver::new(index, input)).await
        }
        Err(report) => {
            let message = report.startup_error.clone().unwrap_or_default();
            codec::write_frame(&mut output, &WorkerEvent::StartupFailed { message }).await?;
            report
        }
    };

    codec::write_frame(&mut output, &WorkerEvent::Finished(report.clone())).await?;
    Ok(report)
}
