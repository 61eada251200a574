//! Cluster error types

use thiserror::Error;

use contracts::ClusterKind;

/// Engine-level errors
///
/// Worker-local failures (executor errors, batches that fail to encode or
/// decode) never show up here; they are recorded against the worker and
/// reported in its `WorkerReport`.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Invalid factory input
    #[error("invalid cluster configuration: {message}")]
    Configuration { message: String },

    /// `dispatch` or `await_completion` before `initialize`
    #[error("{kind} cluster is not initialized")]
    NotInitialized { kind: ClusterKind },

    /// `initialize` called twice
    #[error("{kind} cluster is already initialized")]
    AlreadyInitialized { kind: ClusterKind },

    /// `dispatch` after the sentinel was sent
    #[error("{kind} cluster has already been shut down")]
    AlreadyCompleted { kind: ClusterKind },

    /// The empty batch is reserved as the shutdown sentinel
    #[error("empty batches cannot be dispatched, the empty batch is the shutdown sentinel")]
    EmptyBatch,

    /// The worker's receive side is gone, the batch was not accepted
    #[error("channel to worker-{worker} is closed")]
    ChannelClosed { worker: usize },

    /// A worker could not open its sink connection or never reported ready
    #[error("worker-{worker} failed to start: {message}")]
    WorkerStartup { worker: usize, message: String },

    /// The execution unit (thread or process) could not be created
    #[error("failed to spawn worker-{worker}: {message}")]
    Spawn { worker: usize, message: String },

    /// Frame encode/decode failure
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Contract error passthrough
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a worker startup error
    pub fn worker_startup(worker: usize, message: impl Into<String>) -> Self {
        Self::WorkerStartup {
            worker,
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
