//! WorkExecutor trait - the per-batch sink write injected into workers
//!
//! Workers never know what they write to. They open one connection when they
//! start, hand every batch to `execute`, and give the connection back to
//! `close` exactly once when they terminate.

use crate::{Batch, ContractError, WorkerId};

/// Per-worker sink writer
///
/// One executor is shared by every worker of a cluster; each worker owns its
/// own `Connection`, so no two workers ever touch the same one.
#[trait_variant::make(WorkExecutor: Send)]
pub trait LocalWorkExecutor {
    /// Dedicated per-worker sink handle
    type Connection: Send;

    /// Executor name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Open the worker's dedicated connection
    ///
    /// # Errors
    /// A failure here is fatal to the worker: it never processes a batch.
    async fn connect(&self, worker: WorkerId) -> Result<Self::Connection, ContractError>;

    /// Write one batch through the worker's connection
    ///
    /// # Errors
    /// Returns write error (should include context). The worker records it
    /// and keeps waiting for the next batch.
    async fn execute(
        &self,
        batch: &Batch,
        connection: &mut Self::Connection,
    ) -> Result<(), ContractError>;

    /// Close the connection
    async fn close(&self, connection: Self::Connection) -> Result<(), ContractError>;
}
