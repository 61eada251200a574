//! Per-source parameters, parsed from the `source.params` table

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{IngestionError, Result};

/// Records produced by the mock source when `count` is not set
pub const DEFAULT_MOCK_COUNT: u64 = 10_000;

/// JSON-lines source parameters
#[derive(Debug, Clone, PartialEq)]
pub struct JsonlSourceConfig {
    /// Input file
    pub path: PathBuf,
    /// Fields to project object documents onto, in order
    pub columns: Option<Vec<String>>,
    /// Leading records to skip
    pub skip: u64,
}

impl JsonlSourceConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let path = params
            .get("path")
            .map(PathBuf::from)
            .ok_or_else(|| IngestionError::invalid_param("path", "jsonl source requires 'path'"))?;

        let columns = params.get("columns").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });
        if columns.as_ref().is_some_and(Vec::is_empty) {
            return Err(IngestionError::invalid_param("columns", "column list is empty"));
        }

        Ok(Self {
            path,
            columns,
            skip: parse_u64(params, "skip")?.unwrap_or(0),
        })
    }
}

/// Mock source parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSourceConfig {
    /// Total records to generate
    pub count: u64,
}

impl MockSourceConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            count: parse_u64(params, "count")?.unwrap_or(DEFAULT_MOCK_COUNT),
        })
    }
}

fn parse_u64(params: &HashMap<String, String>, name: &str) -> Result<Option<u64>> {
    params
        .get(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| IngestionError::invalid_param(name, format!("'{raw}': {e}")))
        })
        .transpose()
}
