//! Built-in sink executors
//!
//! Contains LogSink and FileSink, plus [`SinkExecutor`] which picks one of
//! them from a `SinkConfig`.

mod file;
mod log;

pub use self::file::{FileConnection, FileSink, FileSinkConfig};
pub use self::log::{LogSink, LogTally};

use contracts::{Batch, ContractError, SinkConfig, SinkType, WorkExecutor, WorkerId};

use crate::error::ClusterError;

/// Any built-in sink
pub enum SinkExecutor {
    Log(LogSink),
    File(FileSink),
}

/// Connection of a [`SinkExecutor`]
pub enum SinkConnection {
    Log(LogTally),
    File(FileConnection),
}

impl WorkExecutor for SinkExecutor {
    type Connection = SinkConnection;

    fn name(&self) -> &str {
        match self {
            Self::Log(sink) => sink.name(),
            Self::File(sink) => sink.name(),
        }
    }

    async fn connect(&self, worker: WorkerId) -> Result<SinkConnection, ContractError> {
        match self {
            Self::Log(sink) => sink.connect(worker).await.map(SinkConnection::Log),
            Self::File(sink) => sink.connect(worker).await.map(SinkConnection::File),
        }
    }

    async fn execute(
        &self,
        batch: &Batch,
        connection: &mut SinkConnection,
    ) -> Result<(), ContractError> {
        match (self, connection) {
            (Self::Log(sink), SinkConnection::Log(tally)) => sink.execute(batch, tally).await,
            (Self::File(sink), SinkConnection::File(file)) => sink.execute(batch, file).await,
            _ => Err(ContractError::Other(
                "connection does not belong to this sink".into(),
            )),
        }
    }

    async fn close(&self, connection: SinkConnection) -> Result<(), ContractError> {
        match (self, connection) {
            (Self::Log(sink), SinkConnection::Log(tally)) => sink.close(tally).await,
            (Self::File(sink), SinkConnection::File(file)) => sink.close(file).await,
            _ => Err(ContractError::Other(
                "connection does not belong to this sink".into(),
            )),
        }
    }
}

/// Create the sink executor described by `config`
pub fn create_sink(config: &SinkConfig) -> Result<SinkExecutor, ClusterError> {
    match config.sink_type {
        SinkType::Log => Ok(SinkExecutor::Log(LogSink::new(&config.name))),
        SinkType::File => FileSink::from_params(&config.name, &config.params)
            .map(SinkExecutor::File)
            .map_err(|e| ClusterError::sink_creation(&config.name, e.to_string())),
    }
}
