//! MigrationBlueprint - Config Loader output
//!
//! Describes one complete run: which substrate and how many workers, where
//! pages come from, and which sink the workers write to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use crate::ClusterKind;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete migration configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MigrationBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Worker cluster settings
    #[serde(default)]
    #[validate(nested)]
    pub cluster: ClusterSettings,

    /// Upstream page source
    #[validate(nested)]
    pub source: SourceConfig,

    /// Downstream sink written by every worker
    #[validate(nested)]
    pub sink: SinkConfig,
}

/// Worker cluster settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClusterSettings {
    /// Concurrency substrate
    #[serde(default)]
    pub implementation: ClusterKind,

    /// Number of workers, fixed for the run
    #[serde(default = "default_cluster_size")]
    #[validate(range(min = 1, message = "cluster size must be >= 1"))]
    pub size: usize,

    /// Per-worker channel capacity (batches)
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1, message = "channel capacity must be >= 1"))]
    pub channel_capacity: usize,

    /// How long `initialize` waits for every worker to open its sink connection
    #[serde(default = "default_startup_timeout_secs")]
    #[validate(range(min = 1, message = "startup timeout must be >= 1 second"))]
    pub startup_timeout_secs: u64,
}

impl ClusterSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            implementation: ClusterKind::default(),
            size: default_cluster_size(),
            channel_capacity: default_channel_capacity(),
            startup_timeout_secs: default_startup_timeout_secs(),
        }
    }
}

/// Hardware parallelism times two
pub fn default_cluster_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

fn default_channel_capacity() -> usize {
    16
}

fn default_startup_timeout_secs() -> u64 {
    30
}

/// Source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Source type
    pub source_type: SourceType,

    /// Records per page (one page becomes one batch)
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, message = "page size must be >= 1"))]
    pub page_size: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_page_size() -> usize {
    8000
}

/// Source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// JSON-lines file, one document per line
    Jsonl,
    /// Deterministic generated records
    Mock,
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink name
    #[validate(length(min = 1, message = "sink name cannot be empty"))]
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log a summary of every batch
    Log,
    /// One JSON-lines file per worker
    File,
}
