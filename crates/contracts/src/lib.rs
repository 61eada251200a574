//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the migrator.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Data Model
//! - A `Batch` is one page of `Record`s, dispatched as a unit to exactly one worker
//! - The empty batch is the shutdown sentinel
//! - Everything that crosses a worker channel is plain, serializable data

mod blueprint;
mod cluster_kind;
mod error;
mod executor;
mod page_source;
mod record;
mod worker;

pub use blueprint::*;
pub use cluster_kind::ClusterKind;
pub use error::*;
pub use executor::{LocalWorkExecutor, WorkExecutor};
pub use page_source::{LocalPageSource, PageSource};
pub use record::{Batch, Record, Value};
pub use worker::{ClusterSummary, WorkerId, WorkerReport, WorkerState};
