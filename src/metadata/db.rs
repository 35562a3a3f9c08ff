use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable};

use super::tables::{expiry_key, split_expiry_key, UPLOADS, UPLOAD_EXPIRY};
use super::{FileVisitor, MetadataBackend, MetadataError, UploadVisitor};
use crate::model::{File, FileStatus, Upload};

/// Embedded metadata backend on redb (ACID, MVCC, crash-safe).
///
/// Uploads are msgpack blobs keyed by ID; a second table indexes expiration
/// timestamps so the cleaner scans only the past instead of the whole
/// keyspace. Primary and index writes always share one transaction, so a
/// crash cannot strand a dangling index entry pointing at a live upload;
/// the scan still tolerates dangling entries by skipping them.
///
/// redb serializes write transactions, which makes the read-modify-write in
/// `add_or_update_file` atomic without any per-upload lock.
pub struct RedbMetadataBackend {
    db: Arc<Database>,
}

impl RedbMetadataBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, MetadataError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("filedrop.redb");
        let db = Arc::new(Database::create(db_path)?);

        // Initialize application tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(UPLOADS)?;
            let _ = write_txn.open_table(UPLOAD_EXPIRY)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn load(data: &[u8]) -> Result<Upload, MetadataError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

impl MetadataBackend for RedbMetadataBackend {
    fn create_upload(&self, upload: &Upload) -> Result<(), MetadataError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut uploads = write_txn.open_table(UPLOADS)?;
            if uploads.get(upload.id.as_str())?.is_some() {
                return Err(MetadataError::Conflict(upload.id.clone()));
            }
            let data = rmp_serde::to_vec_named(upload)?;
            uploads.insert(upload.id.as_str(), data.as_slice())?;

            if let Some(expire_at) = upload.expire_at {
                let mut expiry = write_txn.open_table(UPLOAD_EXPIRY)?;
                let key = expiry_key(expire_at.timestamp(), &upload.id);
                expiry.insert(key.as_slice(), ())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_upload(&self, id: &str) -> Result<Option<Upload>, MetadataError> {
        let read_txn = self.db.begin_read()?;
        let uploads = read_txn.open_table(UPLOADS)?;
        match uploads.get(id)? {
            Some(data) => Ok(Some(Self::load(data.value())?)),
            None => Ok(None),
        }
    }

    fn add_or_update_file(&self, upload_id: &str, file: &File) -> Result<(), MetadataError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut uploads = write_txn.open_table(UPLOADS)?;
            let mut upload = match uploads.get(upload_id)? {
                Some(data) => Self::load(data.value())?,
                None => return Err(MetadataError::UploadNotFound(upload_id.to_string())),
            };
            upload.files.insert(file.id.clone(), file.clone());
            let data = rmp_serde::to_vec_named(&upload)?;
            uploads.insert(upload_id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn update_file_status(
        &self,
        upload_id: &str,
        file_id: &str,
        from: FileStatus,
        to: FileStatus,
    ) -> Result<bool, MetadataError> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut uploads = write_txn.open_table(UPLOADS)?;
            let mut upload = match uploads.get(upload_id)? {
                Some(data) => Self::load(data.value())?,
                None => return Err(MetadataError::UploadNotFound(upload_id.to_string())),
            };
            let updated = match upload.files.get_mut(file_id) {
                Some(file) if file.status == from && from.can_transition_to(to) => {
                    file.status = to;
                    true
                }
                _ => false,
            };
            if updated {
                let data = rmp_serde::to_vec_named(&upload)?;
                uploads.insert(upload_id, data.as_slice())?;
            }
            updated
        };
        write_txn.commit()?;
        Ok(updated)
    }

    fn remove_file(&self, upload_id: &str, file_id: &str) -> Result<(), MetadataError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut uploads = write_txn.open_table(UPLOADS)?;
            let upload = match uploads.get(upload_id)? {
                Some(data) => Some(Self::load(data.value())?),
                None => None,
            };
            if let Some(mut upload) = upload {
                if upload.files.remove(file_id).is_some() {
                    let data = rmp_serde::to_vec_named(&upload)?;
                    uploads.insert(upload_id, data.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete_upload(&self, id: &str) -> Result<(), MetadataError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut uploads = write_txn.open_table(UPLOADS)?;
            let expire_at = match uploads.remove(id)? {
                Some(data) => Self::load(data.value())?.expire_at,
                None => None,
            };

            // Primary and index removal share the transaction.
            if let Some(expire_at) = expire_at {
                let mut expiry = write_txn.open_table(UPLOAD_EXPIRY)?;
                let key = expiry_key(expire_at.timestamp(), id);
                expiry.remove(key.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn for_each_expired_upload(
        &self,
        now: DateTime<Utc>,
        visit: UploadVisitor,
    ) -> Result<(), MetadataError> {
        let read_txn = self.db.begin_read()?;
        let expiry = read_txn.open_table(UPLOAD_EXPIRY)?;
        let uploads = read_txn.open_table(UPLOADS)?;

        for entry in expiry.iter()? {
            let (key, _) = entry?;
            let Some((ts, id)) = split_expiry_key(key.value()) else {
                continue;
            };
            if ts > now.timestamp() {
                // Keys are chronological; everything past this point is in
                // the future.
                break;
            }
            match uploads.get(id)? {
                Some(data) => {
                    let upload = Self::load(data.value())?;
                    // The index key truncates to whole seconds; the document
                    // carries the precise instant, so filter on that.
                    if upload.is_expired(now) {
                        visit(upload)?;
                    }
                }
                // Dangling index entry (upload already purged): skip.
                None => continue,
            }
        }
        Ok(())
    }

    fn for_each_removed_file(&self, visit: FileVisitor) -> Result<(), MetadataError> {
        let read_txn = self.db.begin_read()?;
        let uploads = read_txn.open_table(UPLOADS)?;
        for entry in uploads.iter()? {
            let (_, data) = entry?;
            let upload = Self::load(data.value())?;
            for file in upload.files.into_values() {
                if file.status.is_purgeable() {
                    visit(file)?;
                }
            }
        }
        Ok(())
    }

    fn for_each_upload(&self, visit: UploadVisitor) -> Result<(), MetadataError> {
        let read_txn = self.db.begin_read()?;
        let uploads = read_txn.open_table(UPLOADS)?;
        for entry in uploads.iter()? {
            let (_, data) = entry?;
            visit(Self::load(data.value())?)?;
        }
        Ok(())
    }

    fn for_each_file(&self, visit: FileVisitor) -> Result<(), MetadataError> {
        let read_txn = self.db.begin_read()?;
        let uploads = read_txn.open_table(UPLOADS)?;
        for entry in uploads.iter()? {
            let (_, data) = entry?;
            let upload = Self::load(data.value())?;
            for file in upload.files.into_values() {
                visit(file)?;
            }
        }
        Ok(())
    }
}
