use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{Duration, Utc};
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};

use crate::data::{ByteStream, DataBackend, DataError};
use crate::metadata::{MetadataBackend, MetadataError};
use crate::model::{File, FileStatus, Upload};
use crate::password::{self, PasswordError};

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Absent, expired or removed entities all surface as this, so clients
    /// never learn which internal condition they hit.
    #[error("not found")]
    NotFound,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Password-protected upload, credentials missing or wrong.
    #[error("authentication required")]
    Unauthorized,
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Parameters for creating an upload, as supplied by the client.
#[derive(Debug, Default)]
pub struct CreateUpload {
    /// Seconds-to-live. `0` means "server default", negative means "never
    /// expires" (only honored when the server has no maximum TTL).
    pub ttl: i64,
    pub one_shot: bool,
    pub removable: bool,
    pub stream: bool,
    pub login: Option<String>,
    pub password: Option<String>,
    pub comment: Option<String>,
    pub remote_ip: Option<String>,
}

/// Parameters for attaching a file to an upload.
#[derive(Debug)]
pub struct AddFile {
    pub name: String,
    pub declared_type: Option<String>,
}

/// HTTP Basic credentials presented on a download.
#[derive(Debug)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Lifecycle orchestration above the metadata and data backends.
///
/// Enforces the TTL policy at creation, hashes passwords before anything is
/// persisted, drives the file status state machine (one-shot, removable,
/// stream), and routes bytes to the persistent or rendezvous data backend
/// depending on the upload's policy.
pub struct UploadService {
    metadata: Arc<dyn MetadataBackend>,
    data: Arc<dyn DataBackend>,
    stream_data: Option<Arc<dyn DataBackend>>,
    default_ttl: i64,
    max_ttl: i64,
}

impl UploadService {
    pub fn new(
        metadata: Arc<dyn MetadataBackend>,
        data: Arc<dyn DataBackend>,
        stream_data: Option<Arc<dyn DataBackend>>,
        default_ttl: i64,
        max_ttl: i64,
    ) -> Self {
        Self {
            metadata,
            data,
            stream_data,
            default_ttl,
            max_ttl,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataBackend> {
        &self.metadata
    }

    /// Create a new upload under the server TTL policy. The returned upload
    /// still carries its creator token; it is the only time the token is
    /// ever handed out.
    pub fn create_upload(&self, params: CreateUpload) -> Result<Upload, ServiceError> {
        if params.stream && self.stream_data.is_none() {
            return Err(ServiceError::InvalidRequest(
                "stream uploads are disabled on this server".to_string(),
            ));
        }

        let mut upload = Upload::new();
        upload.ttl = match params.ttl {
            0 => self.default_ttl,
            ttl if ttl < 0 => {
                if self.max_ttl >= 0 {
                    return Err(ServiceError::InvalidRequest(
                        "infinite TTL is not allowed on this server".to_string(),
                    ));
                }
                -1
            }
            ttl => {
                if self.max_ttl >= 0 && ttl > self.max_ttl {
                    return Err(ServiceError::InvalidRequest(format!(
                        "requested TTL exceeds maximum of {} seconds",
                        self.max_ttl
                    )));
                }
                ttl
            }
        };
        if upload.ttl > 0 {
            upload.expire_at = Some(upload.created_at + Duration::seconds(upload.ttl));
        }

        if let Some(ref raw) = params.password {
            if raw.is_empty() {
                return Err(ServiceError::InvalidRequest(
                    "password must not be empty".to_string(),
                ));
            }
            upload.password_hash = Some(password::hash(raw)?);
            upload.login = params.login;
        }

        upload.one_shot = params.one_shot;
        upload.removable = params.removable;
        upload.stream = params.stream;
        upload.comment = params.comment;
        upload.remote_ip = params.remote_ip;

        self.metadata.create_upload(&upload)?;
        tracing::info!(upload_id = %upload.id, ttl = upload.ttl, "created upload");
        Ok(upload)
    }

    /// Fetch an upload, treating absent and expired the same way.
    pub fn get_upload(&self, id: &str) -> Result<Upload, ServiceError> {
        let upload = self
            .metadata
            .get_upload(id)?
            .ok_or(ServiceError::NotFound)?;
        if upload.is_expired(Utc::now()) {
            // Gone as far as anyone is concerned; the cleaner will purge it.
            return Err(ServiceError::NotFound);
        }
        Ok(upload)
    }

    /// Attach a file to an upload and stream its bytes into the data
    /// backend, computing the MD5 along the way. For stream uploads this
    /// call blocks until a downloader has consumed the bytes.
    pub async fn add_file(
        &self,
        upload_id: &str,
        token: Option<&str>,
        params: AddFile,
        reader: ByteStream<'_>,
    ) -> Result<File, ServiceError> {
        let upload = self.get_upload(upload_id)?;
        self.authorize(&upload, token)?;

        if params.name.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "file name must not be empty".to_string(),
            ));
        }

        let mut file = File::new(upload_id, &params.name);
        file.detected_type = mime_guess::from_path(&params.name)
            .first()
            .map(|m| m.to_string())
            .or_else(|| params.declared_type.clone());
        file.declared_type = params.declared_type;
        file.status = FileStatus::Uploading;
        self.metadata.add_or_update_file(upload_id, &file)?;

        let (reader, probe) = Md5Reader::new(reader);
        let backend = self.backend_for(&upload);
        let size = match backend.add_file(&file, Box::new(reader)).await {
            Ok(size) => size,
            Err(e) => {
                // Keep the stores consistent: no bytes, no descriptor.
                self.metadata.remove_file(upload_id, &file.id)?;
                return Err(e.into());
            }
        };

        file.size = size;
        file.md5 = Some(probe.finalize());
        // A stream file has already been consumed by its downloader by the
        // time the rendezvous completes.
        file.status = if upload.stream {
            FileStatus::Downloaded
        } else {
            FileStatus::Uploaded
        };
        self.metadata.add_or_update_file(upload_id, &file)?;

        tracing::info!(
            upload_id,
            file_id = %file.id,
            name = %file.name,
            size,
            "file upload complete"
        );
        Ok(file)
    }

    /// Open a download stream for a file, enforcing password protection and
    /// the one-shot policy.
    pub async fn get_file(
        &self,
        upload_id: &str,
        file_id: &str,
        credentials: Option<Credentials>,
    ) -> Result<(File, ByteStream<'static>), ServiceError> {
        let upload = self.get_upload(upload_id)?;
        self.check_password(&upload, credentials)?;

        let file = upload.files.get(file_id).ok_or(ServiceError::NotFound)?;
        let available = match file.status {
            FileStatus::Uploaded => true,
            // A stream file is downloadable while its uploader is blocked
            // in the rendezvous.
            FileStatus::Uploading => upload.stream,
            _ => false,
        };
        if !available {
            return Err(ServiceError::NotFound);
        }

        // Open the bytes before claiming a one-shot download, so a failed
        // read does not consume the single download.
        let backend = self.backend_for(&upload);
        let reader = match backend.get_file(file).await {
            Ok(reader) => reader,
            Err(DataError::NotFound(key)) => {
                if !upload.stream {
                    // Metadata references bytes the data backend cannot
                    // locate: data corruption, never auto-healed.
                    tracing::error!(key, "metadata references missing data object");
                }
                return Err(ServiceError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if upload.one_shot && file.status == FileStatus::Uploaded {
            // Claim the single download before serving any byte; a lost
            // race means someone else already downloaded it.
            let claimed = self.metadata.update_file_status(
                upload_id,
                file_id,
                FileStatus::Uploaded,
                FileStatus::Downloaded,
            )?;
            if !claimed {
                return Err(ServiceError::NotFound);
            }
        }

        Ok((file.sanitized(), reader))
    }

    /// Soft-delete one file. Allowed for removable uploads, or with the
    /// creator token. The bytes are purged by the next cleaning pass.
    pub fn remove_file(
        &self,
        upload_id: &str,
        file_id: &str,
        token: Option<&str>,
    ) -> Result<(), ServiceError> {
        let upload = self.get_upload(upload_id)?;
        if !upload.removable {
            self.authorize(&upload, token).map_err(|_| {
                ServiceError::Forbidden("this upload does not allow file removal".to_string())
            })?;
        }

        let file = upload.files.get(file_id).ok_or(ServiceError::NotFound)?;
        match file.status {
            FileStatus::Removed | FileStatus::Deleted => Err(ServiceError::NotFound),
            status => {
                self.metadata
                    .update_file_status(upload_id, file_id, status, FileStatus::Removed)?;
                tracing::info!(upload_id, file_id, "file marked removed");
                Ok(())
            }
        }
    }

    /// Delete a whole upload immediately: bytes first, then metadata.
    pub async fn remove_upload(
        &self,
        upload_id: &str,
        token: Option<&str>,
    ) -> Result<(), ServiceError> {
        let upload = self.get_upload(upload_id)?;
        if !upload.removable {
            self.authorize(&upload, token).map_err(|_| {
                ServiceError::Forbidden("this upload does not allow removal".to_string())
            })?;
        }

        self.backend_for(&upload).remove_upload(&upload).await?;
        self.metadata.delete_upload(upload_id)?;
        tracing::info!(upload_id, "upload removed");
        Ok(())
    }

    fn backend_for(&self, upload: &Upload) -> Arc<dyn DataBackend> {
        if upload.stream {
            if let Some(ref stream) = self.stream_data {
                return Arc::clone(stream);
            }
        }
        Arc::clone(&self.data)
    }

    fn authorize(&self, upload: &Upload, token: Option<&str>) -> Result<(), ServiceError> {
        match (token, upload.token.as_deref()) {
            (Some(provided), Some(expected)) if provided == expected => Ok(()),
            _ => Err(ServiceError::Forbidden(
                "missing or invalid upload token".to_string(),
            )),
        }
    }

    fn check_password(
        &self,
        upload: &Upload,
        credentials: Option<Credentials>,
    ) -> Result<(), ServiceError> {
        let Some(ref hash) = upload.password_hash else {
            return Ok(());
        };
        let credentials = credentials.ok_or(ServiceError::Unauthorized)?;
        if let Some(ref login) = upload.login {
            if credentials.login != *login {
                return Err(ServiceError::Unauthorized);
            }
        }
        if !password::verify(&credentials.password, hash)? {
            return Err(ServiceError::Unauthorized);
        }
        Ok(())
    }
}

/// Wraps an upload body, feeding every byte that passes through into an
/// incremental MD5 context shared with a [`Md5Probe`].
struct Md5Reader<'a> {
    inner: ByteStream<'a>,
    state: Arc<Mutex<md5::Context>>,
}

/// Handle to retrieve the digest once the wrapped reader is exhausted.
struct Md5Probe {
    state: Arc<Mutex<md5::Context>>,
}

impl<'a> Md5Reader<'a> {
    fn new(inner: ByteStream<'a>) -> (Self, Md5Probe) {
        let state = Arc::new(Mutex::new(md5::Context::new()));
        let probe = Md5Probe {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, probe)
    }
}

impl Md5Probe {
    fn finalize(self) -> String {
        let context = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, md5::Context::new())
        };
        format!("{:x}", context.compute())
    }
}

impl AsyncRead for Md5Reader<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let mut state = this.state.lock().unwrap_or_else(|e| e.into_inner());
                state.consume(&buf.filled()[before..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
