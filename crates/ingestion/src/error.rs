//! Ingestion error types

use std::path::PathBuf;

use contracts::ContractError;
use thiserror::Error;

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Source file could not be opened
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Read failure in the middle of a source
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line is not a usable record
    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    /// Bad source parameter
    #[error("invalid source parameter '{name}': {message}")]
    InvalidParam { name: String, message: String },
}

impl IngestionError {
    pub fn invalid_param(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParam {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<IngestionError> for ContractError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::InvalidParam { name, message } => {
                ContractError::config_validation(format!("source.params.{name}"), message)
            }
            other => ContractError::source_read("ingestion", other.to_string()),
        }
    }
}

/// Ingestion Result type alias
pub type Result<T> = std::result::Result<T, IngestionError>;
