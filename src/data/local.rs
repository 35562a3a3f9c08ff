use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{ByteStream, DataBackend, DataError};
use crate::model::{File, Upload};

/// Local filesystem data backend.
///
/// Objects are stored at `<base>/<first-2-chars-of-file-id>/<file-id>`.
/// Two shard levels give ~3,844 directories, reaching ~65k files per
/// directory at around a quarter-billion stored files.
///
/// An older layout kept one directory per upload:
/// `<base>/<first-2-chars-of-upload-id>/<upload-id>/<file-id>`. Reads and
/// deletes still probe it so data written by previous versions stays
/// reachable; writes only ever use the current layout.
pub struct LocalDataBackend {
    directory: PathBuf,
}

impl LocalDataBackend {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, std::io::Error> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    fn shard(&self, id: &str) -> Result<PathBuf, DataError> {
        if id.len() < 3 || !id.is_ascii() {
            return Err(DataError::InvalidId(id.to_string()));
        }
        Ok(self.directory.join(&id[..2]))
    }

    fn object_path(&self, file: &File) -> Result<PathBuf, DataError> {
        Ok(self.shard(&file.id)?.join(&file.id))
    }

    fn legacy_path(&self, file: &File) -> Result<PathBuf, DataError> {
        Ok(self
            .shard(&file.upload_id)?
            .join(&file.upload_id)
            .join(&file.id))
    }
}

#[async_trait]
impl DataBackend for LocalDataBackend {
    async fn add_file(&self, file: &File, mut reader: ByteStream<'_>) -> Result<u64, DataError> {
        let path = self.object_path(file)?;
        tokio::fs::create_dir_all(self.shard(&file.id)?).await?;

        let mut out = tokio::fs::File::create(&path).await?;
        let written = tokio::io::copy(&mut reader, &mut out).await?;
        out.flush().await?;
        out.sync_all().await?;

        tracing::debug!(path = %path.display(), bytes = written, "stored file");
        Ok(written)
    }

    async fn get_file(&self, file: &File) -> Result<ByteStream<'static>, DataError> {
        let path = self.object_path(file)?;
        match tokio::fs::File::open(&path).await {
            Ok(handle) => return Ok(Box::new(handle)),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Fall back to the pre-sharding-change layout.
        let legacy = self.legacy_path(file)?;
        match tokio::fs::File::open(&legacy).await {
            Ok(handle) => Ok(Box::new(handle)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DataError::NotFound(format!(
                "{}/{}",
                file.upload_id, file.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, file: &File) -> Result<(), DataError> {
        for path in [self.object_path(file)?, self.legacy_path(file)?] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn remove_upload(&self, upload: &Upload) -> Result<(), DataError> {
        for file in upload.files.values() {
            self.remove_file(file).await?;
        }

        // The legacy layout kept a directory per upload; drop it wholesale
        // in case it holds files no longer referenced by metadata.
        if upload.id.len() >= 3 && upload.id.is_ascii() {
            let legacy_dir = self.directory.join(&upload.id[..2]).join(&upload.id);
            match tokio::fs::remove_dir_all(&legacy_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
