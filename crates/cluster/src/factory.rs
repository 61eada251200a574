//! Engine factory

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use contracts::{ClusterKind, ClusterSettings, WorkExecutor};

use crate::cooperative::CooperativeEngine;
use crate::engine::Engine;
use crate::error::ClusterError;
use crate::process_pool::ProcessPoolEngine;
use crate::thread_pool::ThreadPoolEngine;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// How to launch one process-pool worker
///
/// The engine adds `MIGRATOR_WORKER_INDEX` to the environment of each child.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Re-run the current executable
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Cluster configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub kind: ClusterKind,
    pub size: usize,
    pub channel_capacity: usize,
    pub startup_timeout: Duration,
    /// Required for the process pool
    pub worker_command: Option<WorkerCommand>,
}

impl ClusterConfig {
    pub fn new(kind: ClusterKind, size: usize) -> Self {
        Self {
            kind,
            size,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            worker_command: None,
        }
    }

    pub fn from_settings(settings: &ClusterSettings) -> Self {
        Self {
            kind: settings.implementation,
            size: settings.size,
            channel_capacity: settings.channel_capacity,
            startup_timeout: settings.startup_timeout(),
            worker_command: None,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    /// Check the configuration, returning the cluster size
    pub fn validate(&self) -> Result<NonZeroUsize, ClusterError> {
        let size = NonZeroUsize::new(self.size)
            .ok_or_else(|| ClusterError::configuration("cluster size must be >= 1"))?;
        if self.channel_capacity == 0 {
            return Err(ClusterError::configuration("channel capacity must be >= 1"));
        }
        if self.startup_timeout.is_zero() {
            return Err(ClusterError::configuration("startup timeout must be positive"));
        }
        if self.kind == ClusterKind::ProcessPool && self.worker_command.is_none() {
            return Err(ClusterError::configuration(
                "process pool needs a worker command to launch",
            ));
        }
        Ok(size)
    }
}

/// Builds the engine variant matching a `ClusterKind`
pub struct EngineFactory;

impl EngineFactory {
    /// Create a ready-to-initialize engine
    ///
    /// The executor drives in-process workers. Process-pool workers build
    /// their own executor inside the child, from the worker command.
    pub fn create<E>(executor: Arc<E>, config: ClusterConfig) -> Result<Engine<E>, ClusterError>
    where
        E: WorkExecutor + Send + Sync + 'static,
    {
        config.validate()?;
        info!(
            kind = %config.kind,
            size = config.size,
            executor = executor.name(),
            "Creating dispatch engine"
        );

        let engine = match config.kind {
            ClusterKind::Cooperative => Engine::Cooperative(CooperativeEngine::new(executor, config)?),
            ClusterKind::ThreadPool => Engine::ThreadPool(ThreadPoolEngine::new(executor, config)?),
            ClusterKind::ProcessPool => Engine::ProcessPool(ProcessPoolEngine::new(config)?),
        };
        Ok(engine)
    }

    /// Create from an implementation name such as `"threading"`
    pub fn create_named<E>(
        executor: Arc<E>,
        size: usize,
        implementation: &str,
    ) -> Result<Engine<E>, ClusterError>
    where
        E: WorkExecutor + Send + Sync + 'static,
    {
        let kind = implementation.parse::<ClusterKind>()?;
        Self::create(executor, ClusterConfig::new(kind, size))
    }
}

/// Convenience wrapper around [`EngineFactory::create`]
pub fn create_engine<E>(executor: Arc<E>, config: ClusterConfig) -> Result<Engine<E>, ClusterError>
where
    E: WorkExecutor + Send + Sync + 'static,
{
    EngineFactory::create(executor, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DispatchEngine;
    use crate::sinks::LogSink;

    fn executor() -> Arc<LogSink> {
        Arc::new(LogSink::new("test"))
    }

    #[test]
    fn test_create_matches_kind() {
        let engine = EngineFactory::create(executor(), ClusterConfig::new(ClusterKind::ThreadPool, 3))
            .unwrap();
        assert!(matches!(engine, Engine::ThreadPool(_)));
        assert_eq!(engine.kind(), ClusterKind::ThreadPool);
        assert_eq!(engine.cluster_size(), 3);
        assert_eq!(engine.worker_statuses().len(), 3);
    }

    #[test]
    fn test_create_named_accepts_aliases() {
        let engine = EngineFactory::create_named(executor(), 2, "asyncio").unwrap();
        assert!(matches!(engine, Engine::Cooperative(_)));

        let engine = EngineFactory::create_named(executor(), 2, "threading").unwrap();
        assert!(matches!(engine, Engine::ThreadPool(_)));
    }

    #[test]
    fn test_unknown_implementation_is_rejected() {
        let result = EngineFactory::create_named(executor(), 2, "greenlets");
        assert!(matches!(result, Err(ClusterError::Contract(_))));
    }

    #[test]
    fn test_zero_size_is_rejected() {
        for kind in ClusterKind::ALL {
            let config = ClusterConfig::new(kind, 0).with_worker_command(WorkerCommand::new("true"));
            assert!(matches!(
                EngineFactory::create(executor(), config),
                Err(ClusterError::Configuration { .. })
            ));
        }
    }

    #[test]
    fn test_process_pool_needs_command() {
        let config = ClusterConfig::new(ClusterKind::ProcessPool, 2);
        assert!(EngineFactory::create(executor(), config.clone()).is_err());

        let config = config.with_worker_command(WorkerCommand::new("migrator").arg("worker"));
        let engine = EngineFactory::create(executor(), config).unwrap();
        assert!(matches!(engine, Engine::ProcessPool(_)));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = ClusterSettings {
            implementation: ClusterKind::ThreadPool,
            size: 5,
            channel_capacity: 2,
            startup_timeout_secs: 3,
        };
        let config = ClusterConfig::from_settings(&settings);
        assert_eq!(config.size, 5);
        assert_eq!(config.channel_capacity, 2);
        assert_eq!(config.startup_timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }
}
