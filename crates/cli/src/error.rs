//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// The run finished but some work did not make it to the sink
    #[error(
        "Migration finished with failures: {failed_workers} worker(s) failed, \
         {failed_batches} batch(es) failed, {rejected_batches} batch(es) rejected"
    )]
    MigrationFailed {
        failed_workers: usize,
        failed_batches: u64,
        rejected_batches: u64,
    },

    /// At least one benchmarked implementation did not complete cleanly
    #[error("Benchmark failed for: {implementations}")]
    BenchmarkFailed { implementations: String },

    /// Process-pool worker could not be set up
    #[error("Worker {index} failed: {message}")]
    Worker { index: usize, message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn worker(index: usize, message: impl Into<String>) -> Self {
        Self::Worker {
            index,
            message: message.into(),
        }
    }
}
