//! ClusterKind - which concurrency substrate runs the workers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// Concurrency substrate for the worker cluster
///
/// Serialized as its canonical name. Deserialization goes through
/// [`FromStr`], so config files accept the same aliases as the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClusterKind {
    /// Tasks on one dedicated single-threaded scheduler
    #[default]
    Cooperative,
    /// One OS thread per worker, each with a private current-thread runtime
    ThreadPool,
    /// One OS process per worker, batches serialized over a pipe
    ProcessPool,
}

impl ClusterKind {
    pub const ALL: [ClusterKind; 3] = [Self::Cooperative, Self::ThreadPool, Self::ProcessPool];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cooperative => "cooperative",
            Self::ThreadPool => "thread_pool",
            Self::ProcessPool => "process_pool",
        }
    }

    /// Whether batches must be serialized to reach a worker
    pub fn requires_serialization(&self) -> bool {
        matches!(self, Self::ProcessPool)
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterKind {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "cooperative" | "asyncio" | "async" => Ok(Self::Cooperative),
            "thread_pool" | "threading" | "thread" => Ok(Self::ThreadPool),
            "process_pool" | "multiprocessing" | "process" => Ok(Self::ProcessPool),
            other => Err(ContractError::config_validation(
                "cluster.implementation",
                format!(
                    "unsupported implementation '{other}', expected one of: \
                     cooperative, thread_pool, process_pool"
                ),
            )),
        }
    }
}

impl TryFrom<String> for ClusterKind {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClusterKind> for String {
    fn from(kind: ClusterKind) -> Self {
        kind.as_str().to_string()
    }
}
