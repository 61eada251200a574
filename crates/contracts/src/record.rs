//! Record model - what flows from a source page to a worker
//!
//! A `Batch` is an ordered list of `Record`s, each an ordered tuple of scalar
//! `Value`s. Everything here is plain data so it can cross a process boundary.

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Scalar field value
///
/// Externally tagged so that non-self-describing codecs (bincode) can decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Convert a JSON value into a scalar field
    ///
    /// # Errors
    /// Arrays and objects are rejected, records only carry scalars.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ContractError> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Int(i)),
                None => n.as_f64().map(Self::Float).ok_or_else(|| {
                    ContractError::invalid_record(format!("number out of range: {n}"))
                }),
            },
            serde_json::Value::String(s) => Ok(Self::Text(s)),
            other => Err(ContractError::invalid_record(format!(
                "nested value is not a scalar: {other}"
            ))),
        }
    }

    /// Convert into a plain JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            // NaN / infinity have no JSON form
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One row: an ordered tuple of scalar fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Vec<Value>);

impl Record {
    pub fn new(fields: Vec<Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a record from a JSON document
    ///
    /// Arrays map positionally. Objects are projected onto `columns`, in order;
    /// a missing column becomes `Null`.
    pub fn from_json(
        value: serde_json::Value,
        columns: Option<&[String]>,
    ) -> Result<Self, ContractError> {
        match (value, columns) {
            (serde_json::Value::Array(items), _) => items
                .into_iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Self),
            (serde_json::Value::Object(mut map), Some(columns)) => columns
                .iter()
                .map(|c| Value::from_json(map.remove(c).unwrap_or(serde_json::Value::Null)))
                .collect::<Result<Vec<_>, _>>()
                .map(Self),
            (serde_json::Value::Object(_), None) => Err(ContractError::invalid_record(
                "object documents need an explicit column list",
            )),
            (other, _) => Ok(Self(vec![Value::from_json(other)?])),
        }
    }

    /// Render as a JSON array
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.0.iter().map(Value::to_json).collect())
    }
}

impl From<Vec<Value>> for Record {
    fn from(fields: Vec<Value>) -> Self {
        Self(fields)
    }
}

/// Unit of dispatch: an ordered, finite list of records
///
/// The empty batch is the sentinel telling a worker to drain and stop.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// The shutdown sentinel
    pub fn sentinel() -> Self {
        Self::default()
    }

    pub fn is_sentinel(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl From<Vec<Record>> for Batch {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}
