//! Dedicated writer task for the serial link.
//!
//! The engine never touches the write half directly. Encoded frames and
//! single control bytes go through an mpsc channel to a writer task that
//! owns the write half, batching whatever is ready into one vectored write.
//!
//! # Architecture
//!
//! ```text
//! Engine ─► mpsc::Sender<Bytes> ─► Writer Task ─► serial write half
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, ZWaveError};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Maximum chunks to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 16;

/// Handle for sending bytes to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue bytes for the serial port.
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        self.tx.send(bytes).await.map_err(|_| ZWaveError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for sending bytes.
///
/// The task exits cleanly once every handle is dropped, or with an error
/// when the write half fails.
pub fn spawn_writer_task<W>(writer: W, channel_capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives chunks and writes them to the port.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(chunk) => batch.push(chunk),
                Err(_) => break,
            }
        }

        tracing::trace!(chunks = batch.len(), "writing batch");
        write_batch(&mut writer, &batch).await?;
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch with scatter/gather I/O, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ZWaveError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices for the part of the batch after the first `skip_bytes` bytes.
fn remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for chunk in batch {
        let end = offset + chunk.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&chunk[start..]));
        }
        offset = end;
    }

    slices
}
