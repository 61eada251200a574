//! LogSink - logs a summary of every batch via tracing

use contracts::{Batch, ContractError, WorkExecutor, WorkerId};
use tracing::{debug, info, instrument};

/// Sink that only logs what it receives
///
/// Useful for dry runs and for checking how batches spread over workers.
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Per-worker running tally, standing in for a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTally {
    pub worker: WorkerId,
    pub batches: u64,
    pub records: u64,
}

impl WorkExecutor for LogSink {
    type Connection = LogTally;

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, worker: WorkerId) -> Result<LogTally, ContractError> {
        debug!(sink = %self.name, worker = %worker, "LogSink connected");
        Ok(LogTally {
            worker,
            batches: 0,
            records: 0,
        })
    }

    #[instrument(
        name = "log_sink_execute",
        skip(self, batch, tally),
        fields(sink = %self.name, worker = %tally.worker)
    )]
    async fn execute(&self, batch: &Batch, tally: &mut LogTally) -> Result<(), ContractError> {
        tally.batches += 1;
        tally.records += batch.len() as u64;

        info!(
            sink = %self.name,
            worker = %tally.worker,
            records = batch.len(),
            first = ?batch.records().first().map(|r| r.to_json()),
            "Batch received"
        );
        Ok(())
    }

    async fn close(&self, tally: LogTally) -> Result<(), ContractError> {
        info!(
            sink = %self.name,
            worker = %tally.worker,
            batches = tally.batches,
            records = tally.records,
            "LogSink closed"
        );
        Ok(())
    }
}
