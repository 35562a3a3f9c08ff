mod db;
mod fs;
mod lock;
mod tables;

pub use db::RedbMetadataBackend;
pub use fs::FsMetadataBackend;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{File, FileStatus, Upload};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("upload {0} already exists")]
    Conflict(String),
    #[error("upload {0} not found")]
    UploadNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for MetadataError {
    fn from(e: redb::CommitError) -> Self {
        MetadataError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for MetadataError {
    fn from(e: redb::DatabaseError) -> Self {
        MetadataError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::StorageError> for MetadataError {
    fn from(e: redb::StorageError) -> Self {
        MetadataError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for MetadataError {
    fn from(e: redb::TableError) -> Self {
        MetadataError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for MetadataError {
    fn from(e: redb::TransactionError) -> Self {
        MetadataError::Transaction(Box::new(e))
    }
}

/// Callback for the iteration methods. Returning an error aborts the scan
/// and propagates to the caller.
pub type UploadVisitor<'a> = &'a mut dyn FnMut(Upload) -> Result<(), MetadataError>;
pub type FileVisitor<'a> = &'a mut dyn FnMut(File) -> Result<(), MetadataError>;

/// Durable store for upload and file descriptors (not the bytes).
///
/// Every method must be safe under unbounded concurrent invocation.
/// "Not found" conditions are normal outcomes, never fatal: `get_upload`
/// returns `None`, and the delete methods are idempotent.
pub trait MetadataBackend: Send + Sync {
    /// Persist a brand-new upload. Fails with `Conflict` if the ID is
    /// already taken; insertion is atomic per ID.
    fn create_upload(&self, upload: &Upload) -> Result<(), MetadataError>;

    /// Point lookup.
    fn get_upload(&self, id: &str) -> Result<Option<Upload>, MetadataError>;

    /// Upsert a single file inside an upload without clobbering concurrent
    /// upserts of sibling files in the same upload.
    fn add_or_update_file(&self, upload_id: &str, file: &File) -> Result<(), MetadataError>;

    /// Compare-and-set a file's status. Returns `true` if the file existed
    /// with status `from` and was moved to `to`; `false` otherwise (the
    /// transition already happened, or the file is gone). Never reverts a
    /// later status to an earlier one.
    fn update_file_status(
        &self,
        upload_id: &str,
        file_id: &str,
        from: FileStatus,
        to: FileStatus,
    ) -> Result<bool, MetadataError>;

    /// Remove one file's metadata entry. Removing an absent file succeeds.
    fn remove_file(&self, upload_id: &str, file_id: &str) -> Result<(), MetadataError>;

    /// Remove the whole upload record and any index entries referencing it.
    /// Idempotent.
    fn delete_upload(&self, id: &str) -> Result<(), MetadataError>;

    /// Visit every upload whose `expire_at <= now` (boundary inclusive).
    fn for_each_expired_upload(
        &self,
        now: DateTime<Utc>,
        visit: UploadVisitor,
    ) -> Result<(), MetadataError>;

    /// Visit every file whose bytes are eligible for purge (status
    /// `removed` or `downloaded`; a downloaded file is never served
    /// again, so its bytes only wait for the cleaner).
    fn for_each_removed_file(&self, visit: FileVisitor) -> Result<(), MetadataError>;

    /// Visit every upload. Used by admin/export tooling.
    fn for_each_upload(&self, visit: UploadVisitor) -> Result<(), MetadataError>;

    /// Visit every file of every upload, same audience as
    /// [`Self::for_each_upload`].
    fn for_each_file(&self, visit: FileVisitor) -> Result<(), MetadataError>;
}
