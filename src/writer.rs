//! Dedicated writer task for outbound frames.
//!
//! Sends go through an mpsc channel to a single task owning the write
//! half, so the correlator never holds a lock across a write and frames
//! are written whole, in submission order.
//!
//! ```text
//! call() 1 ─┐
//! call() 2 ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► serial port
//! call() N ─┘
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{KeywireError, Result};

/// Default channel capacity for the outbound frame queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Handle for sending encoded frames to the writer task.
///
/// Cheaply cloneable; dropping every handle shuts the task down cleanly.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue one encoded frame for writing.
    ///
    /// # Errors
    ///
    /// Returns [`KeywireError::ConnectionClosed`] if the writer task has
    /// exited (transport gone).
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| KeywireError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for sending frames.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives frames and writes them out whole.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
        writer.flush().await?;
    }
    // Channel closed, clean shutdown
    Ok(())
}
