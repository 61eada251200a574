//! Point-to-point channels between the engine and one worker
//!
//! Three transports share one pair of traits:
//! - [`task_channel`]: `tokio::sync::mpsc`, for tasks on the caller's runtime
//! - [`thread_channel`]: `async_channel`, usable across OS threads that each
//!   run a private runtime
//! - [`PipeSender`] / [`PipeReceiver`]: serialized frames over a byte stream,
//!   for child processes

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::error;

use contracts::Batch;

use crate::codec;
use crate::error::ClusterError;
use crate::status::WorkerStatus;

/// Engine side of a channel
#[trait_variant::make(BatchSender: Send)]
pub trait LocalBatchSender {
    /// Index of the worker on the other end
    fn worker(&self) -> usize;

    /// Send a batch, waiting while the channel is full
    ///
    /// # Errors
    /// `ChannelClosed` if the worker side is gone.
    async fn send(&mut self, batch: Batch) -> Result<(), ClusterError>;
}

/// Worker side of a channel
#[trait_variant::make(BatchReceiver: Send)]
pub trait LocalBatchReceiver {
    /// Next batch, `None` once every sender is gone
    ///
    /// `Some(Err(_))` means one message could not be decoded; the channel
    /// itself is still usable.
    async fn recv(&mut self) -> Option<Result<Batch, ClusterError>>;
}

/// Bounded in-runtime channel
pub fn task_channel(worker: usize, capacity: usize) -> (TaskSender, TaskReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TaskSender { worker, tx }, TaskReceiver { rx })
}

pub struct TaskSender {
    worker: usize,
    tx: mpsc::Sender<Batch>,
}

pub struct TaskReceiver {
    rx: mpsc::Receiver<Batch>,
}

impl BatchSender for TaskSender {
    fn worker(&self) -> usize {
        self.worker
    }

    async fn send(&mut self, batch: Batch) -> Result<(), ClusterError> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| ClusterError::ChannelClosed {
                worker: self.worker,
            })
    }
}

impl BatchReceiver for TaskReceiver {
    async fn recv(&mut self) -> Option<Result<Batch, ClusterError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Bounded channel whose halves may live on different threads and runtimes
pub fn thread_channel(worker: usize, capacity: usize) -> (ThreadSender, ThreadReceiver) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    (ThreadSender { worker, tx }, ThreadReceiver { rx })
}

pub struct ThreadSender {
    worker: usize,
    tx: async_channel::Sender<Batch>,
}

pub struct ThreadReceiver {
    rx: async_channel::Receiver<Batch>,
}

impl BatchSender for ThreadSender {
    fn worker(&self) -> usize {
        self.worker
    }

    async fn send(&mut self, batch: Batch) -> Result<(), ClusterError> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| ClusterError::ChannelClosed {
                worker: self.worker,
            })
    }
}

impl BatchReceiver for ThreadReceiver {
    async fn recv(&mut self) -> Option<Result<Batch, ClusterError>> {
        self.rx.recv().await.ok().map(Ok)
    }
}

/// Writes batches as frames onto a byte stream
///
/// Capacity is whatever the underlying pipe buffers. A batch that cannot be
/// encoded never reaches the pipe; it is counted as failed on the receiving
/// worker's status and the send still succeeds.
pub struct PipeSender<W> {
    worker: usize,
    writer: W,
    status: Arc<WorkerStatus>,
    max_frame: usize,
}

impl<W> PipeSender<W> {
    pub fn new(worker: usize, writer: W, status: Arc<WorkerStatus>) -> Self {
        Self {
            worker,
            writer,
            status,
            max_frame: codec::MAX_FRAME_LEN,
        }
    }

    /// Lower the payload limit for this pipe
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }
}

impl<W> BatchSender for PipeSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn worker(&self) -> usize {
        self.worker
    }

    async fn send(&mut self, batch: Batch) -> Result<(), ClusterError> {
        let frame = match codec::encode_with_limit(&batch, self.max_frame) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    worker = self.worker,
                    records = batch.len(),
                    error = %e,
                    "Batch could not be encoded"
                );
                self.status.inc_failed(batch.len(), e.to_string());
                return Ok(());
            }
        };

        if self.writer.write_all(&frame).await.is_err() || self.writer.flush().await.is_err() {
            return Err(ClusterError::ChannelClosed {
                worker: self.worker,
            });
        }
        Ok(())
    }
}

/// Reads batch frames from a byte stream
pub struct PipeReceiver<R> {
    worker: usize,
    reader: R,
}

impl<R> PipeReceiver<R> {
    pub fn new(worker: usize, reader: R) -> Self {
        Self { worker, reader }
    }
}

impl<R> BatchReceiver for PipeReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<Batch, ClusterError>> {
        match codec::read_frame(&mut self.reader).await {
            Ok(Some(payload)) => Some(codec::decode(&payload)),
            Ok(None) => None,
            Err(e) => {
                // Framing is lost; nothing after this point can be trusted
                error!(worker = self.worker, error = %e, "Batch pipe broken");
                None
            }
        }
    }
}
