//! FileSink - one JSON-lines file per worker

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use contracts::{Batch, ContractError, WorkExecutor, WorkerId};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output directory
    pub dir: PathBuf,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ContractError> {
        let dir = params
            .get("dir")
            .map(PathBuf::from)
            .ok_or_else(|| ContractError::config_validation("sink.params.dir", "file sink requires 'dir'"))?;
        Ok(Self { dir })
    }
}

/// Sink writing each worker's records to `<dir>/<name>-worker-<i>.jsonl`
///
/// Every record becomes one JSON array line. Each worker owns its file, so
/// no two workers ever touch the same handle.
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
}

/// An open per-worker output file
pub struct FileConnection {
    worker: WorkerId,
    path: PathBuf,
    writer: BufWriter<File>,
    lines: u64,
}

impl FileConnection {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }
}

impl FileSink {
    /// Create a new FileSink
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        Ok(Self::new(name, FileSinkConfig::from_params(params)?))
    }

    /// Output file of one worker
    pub fn path_for(&self, worker: WorkerId) -> PathBuf {
        self.config
            .dir
            .join(format!("{}-worker-{}.jsonl", self.name, worker.index()))
    }
}

impl WorkExecutor for FileSink {
    type Connection = FileConnection;

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "file_sink_connect", skip(self), fields(sink = %self.name))]
    async fn connect(&self, worker: WorkerId) -> Result<FileConnection, ContractError> {
        fs::create_dir_all(&self.config.dir)
            .await
            .map_err(|e| ContractError::sink_connection(&self.name, e.to_string()))?;

        let path = self.path_for(worker);
        let file = File::create(&path)
            .await
            .map_err(|e| ContractError::sink_connection(&self.name, format!("{}: {e}", path.display())))?;

        debug!(sink = %self.name, path = %path.display(), "Output file opened");
        Ok(FileConnection {
            worker,
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    #[instrument(
        name = "file_sink_execute",
        skip(self, batch, connection),
        fields(sink = %self.name, worker = %connection.worker, records = batch.len())
    )]
    async fn execute(
        &self,
        batch: &Batch,
        connection: &mut FileConnection,
    ) -> Result<(), ContractError> {
        let mut buf = Vec::with_capacity(batch.len() * 64);
        for record in batch.records() {
            serde_json::to_writer(&mut buf, &record.to_json())
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
            buf.push(b'\n');
        }

        connection
            .writer
            .write_all(&buf)
            .await
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        connection
            .writer
            .flush()
            .await
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;

        connection.lines += batch.len() as u64;
        Ok(())
    }

    async fn close(&self, mut connection: FileConnection) -> Result<(), ContractError> {
        connection
            .writer
            .shutdown()
            .await
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        debug!(
            sink = %self.name,
            path = %connection.path.display(),
            lines = connection.lines,
            "Output file closed"
        );
        Ok(())
    }
}
