//! Live per-worker status for observability

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use contracts::{WorkerId, WorkerReport, WorkerState};

/// Status of a single worker
///
/// Shared between the engine and the worker's execution unit. For process
/// workers the engine keeps its own copy, updated from pipe events.
#[derive(Debug)]
pub struct WorkerStatus {
    worker: WorkerId,
    state: AtomicU8,
    batches_processed: AtomicU64,
    batches_failed: AtomicU64,
    records_processed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl WorkerStatus {
    /// Create a status in `Starting`
    pub fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            state: AtomicU8::new(WorkerState::Starting.as_u8()),
            batches_processed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            records_processed: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Move to a new lifecycle state
    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
        observability::record_worker_state(self.worker.index(), state);
    }

    /// Get processed batch count
    pub fn batches_processed(&self) -> u64 {
        self.batches_processed.load(Ordering::Relaxed)
    }

    /// Get failed batch count
    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    /// Get processed record count
    pub fn records_processed(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    /// Account for a successfully processed batch
    pub fn inc_processed(&self, records: usize) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.records_processed
            .fetch_add(records as u64, Ordering::Relaxed);
        observability::record_batch_processed(self.worker.index(), records, true);
    }

    /// Account for a failed batch
    pub fn inc_failed(&self, records: usize, error: impl Into<String>) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.into());
        }
        observability::record_batch_processed(self.worker.index(), records, false);
    }

    /// Merge a report received from the worker's own process
    ///
    /// Counters add to what this side already recorded, which is only ever
    /// batches that never made it onto the pipe. Returns the merged report.
    pub fn absorb(&self, report: &WorkerReport) -> WorkerReport {
        self.batches_processed
            .fetch_add(report.batches_processed, Ordering::Relaxed);
        self.batches_failed
            .fetch_add(report.batches_failed, Ordering::Relaxed);
        self.records_processed
            .fetch_add(report.records_processed, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            if report.last_error.is_some() {
                *last = report.last_error.clone();
            }
        }
        self.state.store(report.state.as_u8(), Ordering::Release);

        WorkerReport {
            startup_error: report.startup_error.clone(),
            fatal_error: report.fatal_error.clone(),
            ..self.report()
        }
    }

    /// Report for a worker whose execution unit was lost
    ///
    /// Keeps whatever the worker had already accounted for.
    pub fn lost(&self, reason: impl Into<String>) -> WorkerReport {
        self.set_state(WorkerState::Terminated);
        let mut report = self.report();
        report.fatal_error = Some(reason.into());
        report
    }

    /// Build a report from the current counters
    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            worker: self.worker.index(),
            state: self.state(),
            batches_processed: self.batches_processed(),
            batches_failed: self.batches_failed(),
            records_processed: self.records_processed(),
            startup_error: None,
            last_error: self.last_error.lock().ok().and_then(|l| l.clone()),
            fatal_error: None,
        }
    }
}
