use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::{mpsc, oneshot};

use super::{ByteStream, DataBackend, DataError};
use crate::model::{File, Upload};

const CHUNK_SIZE: usize = 32 * 1024;

/// An upload waiting for its downloader.
struct PendingDownload {
    attach: oneshot::Sender<()>,
    chunks: mpsc::Receiver<io::Result<Bytes>>,
}

/// Rendezvous data backend: nothing is ever persisted.
///
/// `add_file` and `get_file` for the same key must be called by two actors
/// that overlap in time; bytes flow from the uploader's body straight into
/// the downloader's response through a capacity-1 channel. The blocking
/// `add_file` is the one deliberate, load-bearing blocking point in the
/// system, not a bug.
///
/// Timeout policy: the uploader waits at most `timeout` for a downloader to
/// attach, then allows at most `timeout` per forwarded chunk. An uploader
/// whose downloader never shows up (or stalls) fails with
/// `DataError::Timeout` instead of hanging forever.
///
/// The registry mutex only guards the map; all I/O happens outside it.
pub struct StreamBackend {
    pending: Mutex<HashMap<String, PendingDownload>>,
    timeout: Duration,
}

impl StreamBackend {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn key(file: &File) -> String {
        format!("{}/{}", file.upload_id, file.id)
    }

    fn register(&self, key: &str) -> (oneshot::Receiver<()>, mpsc::Sender<io::Result<Bytes>>) {
        let (attach_tx, attach_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let previous = pending.insert(
            key.to_string(),
            PendingDownload {
                attach: attach_tx,
                chunks: chunk_rx,
            },
        );
        if previous.is_some() {
            tracing::warn!(key, "replaced a pending stream upload");
        }
        (attach_rx, chunk_tx)
    }

    fn unregister(&self, key: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(key);
    }
}

#[async_trait]
impl DataBackend for StreamBackend {
    async fn add_file(&self, file: &File, mut reader: ByteStream<'_>) -> Result<u64, DataError> {
        let key = Self::key(file);
        let (attach_rx, chunk_tx) = self.register(&key);

        tracing::debug!(key, "stream backend waiting for download");

        // Block (bounded) until a consumer claims the pending entry.
        match tokio::time::timeout(self.timeout, attach_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                self.unregister(&key);
                return Err(DataError::Timeout(key));
            }
        }

        let mut written: u64 = 0;
        loop {
            let mut chunk = BytesMut::with_capacity(CHUNK_SIZE);
            let n = match reader.read_buf(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    // Propagate the upload failure to the downloader.
                    let _ = chunk_tx
                        .send(Err(io::Error::new(e.kind(), "upload stream failed")))
                        .await;
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }
            written += n as u64;

            match tokio::time::timeout(self.timeout, chunk_tx.send(Ok(chunk.freeze()))).await {
                Ok(Ok(())) => {}
                // Downloader went away mid-transfer.
                Ok(Err(_)) => {
                    return Err(DataError::Io(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "download aborted by consumer",
                    )))
                }
                Err(_) => return Err(DataError::Timeout(key)),
            }
        }

        tracing::debug!(key, bytes = written, "stream fully handed off");
        Ok(written)
    }

    async fn get_file(&self, file: &File) -> Result<ByteStream<'static>, DataError> {
        let key = Self::key(file);
        let entry = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&key)
        };

        // A downloader arriving before any uploader (or after one already
        // completed) fails fast rather than blocking.
        let entry = entry.ok_or(DataError::NotFound(key))?;
        let _ = entry.attach.send(());
        Ok(Box::new(ChunkReader {
            rx: entry.chunks,
            current: Bytes::new(),
        }))
    }

    /// No-op: cleanup already happens when `add_file` completes or errors.
    async fn remove_file(&self, _file: &File) -> Result<(), DataError> {
        Ok(())
    }

    /// No-op, same as `remove_file`.
    async fn remove_upload(&self, _upload: &Upload) -> Result<(), DataError> {
        Ok(())
    }
}

/// Adapts the chunk channel into an `AsyncRead` for the response body.
struct ChunkReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.current.is_empty() {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.current = bytes,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // Sender dropped: end of stream.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = this.current.len().min(buf.remaining());
        buf.put_slice(&this.current.split_to(n));
        Poll::Ready(Ok(()))
    }
}
