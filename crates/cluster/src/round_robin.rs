//! Round-robin bookkeeping
//!
//! Batch `k` goes to worker `k mod N`. The counter belongs to one engine and
//! only `dispatch` moves it.

use std::num::NonZeroUsize;

use tracing::debug;

use contracts::{Batch, ClusterKind};

use crate::channel::BatchSender;
use crate::error::ClusterError;

/// Dispatch counter
#[derive(Debug, Clone)]
pub struct RoundRobin {
    counter: u64,
    size: NonZeroUsize,
}

impl RoundRobin {
    pub fn new(size: NonZeroUsize) -> Self {
        Self { counter: 0, size }
    }

    /// Select the next worker and advance
    pub fn next_worker(&mut self) -> usize {
        let worker = (self.counter % self.size.get() as u64) as usize;
        self.counter += 1;
        worker
    }

    /// Number of selections made so far
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// The engine side of every channel, plus the dispatch counter
pub struct Lanes<S> {
    kind: ClusterKind,
    senders: Vec<S>,
    round_robin: RoundRobin,
    accepted: u64,
    closed: bool,
}

impl<S> Lanes<S>
where
    S: BatchSender + Send,
{
    /// `senders[i]` must lead to worker `i`
    pub fn new(kind: ClusterKind, senders: Vec<S>) -> Result<Self, ClusterError> {
        let size = NonZeroUsize::new(senders.len())
            .ok_or_else(|| ClusterError::configuration("a cluster needs at least one worker"))?;
        Ok(Self {
            kind,
            senders,
            round_robin: RoundRobin::new(size),
            accepted: 0,
            closed: false,
        })
    }

    /// Batches accepted by a channel so far
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Send `batch` to the next worker in turn, returning its index
    ///
    /// The counter advances even when the selected channel turns out to be
    /// closed, so the assignment of later batches does not shift.
    pub async fn dispatch(&mut self, batch: Batch) -> Result<usize, ClusterError> {
        if batch.is_sentinel() {
            return Err(ClusterError::EmptyBatch);
        }
        if self.closed {
            return Err(ClusterError::AlreadyCompleted { kind: self.kind });
        }

        let worker = self.round_robin.next_worker();
        let records = batch.len();
        let sender = self.senders.get_mut(worker).ok_or(ClusterError::ChannelClosed { worker })?;
        sender.send(batch).await?;

        self.accepted += 1;
        observability::record_batch_dispatched(self.kind.as_str(), worker, records);
        Ok(worker)
    }

    /// Send the sentinel to every channel once, then drop the senders
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for sender in self.senders.iter_mut() {
            if let Err(e) = sender.send(Batch::sentinel()).await {
                // Worker already gone; its join reports why
                debug!(worker = sender.worker(), error = %e, "Sentinel not delivered");
            }
        }
        self.senders.clear();
    }
}
