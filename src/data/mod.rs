mod local;
mod stream;

pub use local::LocalDataBackend;
pub use stream::StreamBackend;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::model::{File, Upload};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object id: {0}")]
    InvalidId(String),
    #[error("timed out waiting for stream peer: {0}")]
    Timeout(String),
}

/// A streaming byte source. Upload bodies flow in as one of these and
/// download responses flow out as one; no backend buffers a whole file.
/// The lifetime lets request-scoped readers (a multipart field borrowing
/// its body) stream straight into a backend without copying.
pub type ByteStream<'a> = Box<dyn AsyncRead + Send + Unpin + 'a>;

/// Store for file byte content, keyed by `(upload id, file id)`.
/// The metadata backend owns the descriptors; this only owns the bytes.
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Consume the entire `reader` and persist it. Returns the byte count
    /// once durably stored (for the stream backend: once fully handed off
    /// to a consumer).
    async fn add_file(&self, file: &File, reader: ByteStream<'_>) -> Result<u64, DataError>;

    /// Readable handle to the stored bytes. Absence is `NotFound`.
    async fn get_file(&self, file: &File) -> Result<ByteStream<'static>, DataError>;

    /// Idempotent delete; a missing object is a success.
    async fn remove_file(&self, file: &File) -> Result<(), DataError>;

    /// Delete every file belonging to the upload, tolerating individual
    /// not-found entries.
    async fn remove_upload(&self, upload: &Upload) -> Result<(), DataError>;
}
