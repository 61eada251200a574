//! # Cluster
//!
//! Worker-pool dispatch engine.
//!
//! One contract ([`DispatchEngine`]: initialize, dispatch, await completion)
//! over three substrates:
//! - [`CooperativeEngine`]: tasks on the caller's runtime
//! - [`ThreadPoolEngine`]: one OS thread per worker, each with its own runtime
//! - [`ProcessPoolEngine`]: one child process per worker, batches serialized
//!   over a pipe
//!
//! Batches are assigned round-robin. Every worker owns one sink connection for
//! its whole life and drains its channel before terminating.

pub mod channel;
pub mod codec;
pub mod cooperative;
pub mod engine;
pub mod error;
pub mod factory;
pub mod process_pool;
pub mod round_robin;
pub mod sinks;
pub mod status;
pub mod thread_pool;
pub mod worker;

pub use contracts::{Batch, ClusterKind, ClusterSummary, WorkExecutor, WorkerReport};
pub use cooperative::CooperativeEngine;
pub use engine::{DispatchEngine, Engine, LocalDispatchEngine};
pub use error::ClusterError;
pub use factory::{create_engine, ClusterConfig, EngineFactory, WorkerCommand};
pub use process_pool::{serve_pipe, serve_process_worker, ProcessPoolEngine, WorkerEvent, WORKER_INDEX_ENV};
pub use round_robin::RoundRobin;
pub use sinks::{create_sink, FileSink, LogSink, SinkExecutor};
pub use status::WorkerStatus;
pub use thread_pool::ThreadPoolEngine;
