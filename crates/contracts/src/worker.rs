//! Worker identity, lifecycle state and end-of-run reports

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ClusterKind;

/// Worker index within a cluster, `0..N-1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl WorkerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker lifecycle
///
/// `Starting -> Waiting <-> Processing -> Draining -> Terminated`, or
/// `Starting -> Terminated` when the sink connection cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkerState {
    #[default]
    Starting = 0,
    Waiting = 1,
    Processing = 2,
    Draining = 3,
    Terminated = 4,
}

impl WorkerState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Starting),
            1 => Some(Self::Waiting),
            2 => Some(Self::Processing),
            3 => Some(Self::Draining),
            4 => Some(Self::Terminated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final account of one worker's run
///
/// Serializable because process-pool workers send it back over their pipe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Worker index
    pub worker: usize,

    /// State when the report was taken
    pub state: WorkerState,

    /// Batches the executor accepted
    pub batches_processed: u64,

    /// Batches the executor (or the decoder) rejected
    pub batches_failed: u64,

    /// Records in successfully processed batches
    pub records_processed: u64,

    /// Sink connection failure during STARTING
    pub startup_error: Option<String>,

    /// Most recent batch failure
    pub last_error: Option<String>,

    /// Panic, abnormal exit or lost execution unit
    pub fatal_error: Option<String>,
}

impl WorkerReport {
    pub fn new(worker: WorkerId) -> Self {
        Self {
            worker: worker.index(),
            ..Default::default()
        }
    }

    /// Report for a worker whose execution unit was lost before it could report
    pub fn lost(worker: WorkerId, reason: impl Into<String>) -> Self {
        Self {
            worker: worker.index(),
            state: WorkerState::Terminated,
            fatal_error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// True when the worker started and terminated without a fatal condition
    pub fn is_healthy(&self) -> bool {
        self.startup_error.is_none() && self.fatal_error.is_none()
    }

    pub fn batches_received(&self) -> u64 {
        self.batches_processed + self.batches_failed
    }
}

/// Outcome of a whole cluster run, returned by `await_completion`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub kind: ClusterKind,
    pub cluster_size: usize,
    /// Batches accepted by `dispatch`
    pub batches_dispatched: u64,
    /// One report per worker, ordered by index
    pub workers: Vec<WorkerReport>,
}

impl ClusterSummary {
    pub fn batches_processed(&self) -> u64 {
        self.workers.iter().map(|w| w.batches_processed).sum()
    }

    pub fn batches_failed(&self) -> u64 {
        self.workers.iter().map(|w| w.batches_failed).sum()
    }

    pub fn records_processed(&self) -> u64 {
        self.workers.iter().map(|w| w.records_processed).sum()
    }

    /// Indices of workers that did not start or did not terminate cleanly
    pub fn failed_workers(&self) -> Vec<usize> {
        self.workers
            .iter()
            .filter(|w| !w.is_healthy())
            .map(|w| w.worker)
            .collect()
    }

    pub fn all_terminated(&self) -> bool {
        self.workers.iter().all(|w| w.state.is_terminal())
    }
}
