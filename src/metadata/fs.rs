use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::lock::LockTable;
use super::{FileVisitor, MetadataBackend, MetadataError, UploadVisitor};
use crate::model::{File, FileStatus, Upload};

const CONFIG_FILE: &str = ".config";

/// Filesystem metadata backend.
///
/// One pretty-printed JSON document per upload at
/// `<base>/<first-2-chars-of-id>/<id>/.config`. Because the whole document
/// round-trips on every file upsert, single-file mutations are serialized
/// through a per-upload-ID lock table (read latest, merge, write back).
pub struct FsMetadataBackend {
    directory: PathBuf,
    locks: LockTable,
}

impl FsMetadataBackend {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, MetadataError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            locks: LockTable::new(),
        })
    }

    /// `<base>/<id[..2]>/<id>`; two-level sharding bounds the number of
    /// entries per directory.
    fn upload_dir(&self, id: &str) -> Result<PathBuf, MetadataError> {
        if id.len() < 3 || !id.is_ascii() {
            return Err(MetadataError::UploadNotFound(id.to_string()));
        }
        Ok(self.directory.join(&id[..2]).join(id))
    }

    fn read_upload(&self, id: &str) -> Result<Option<Upload>, MetadataError> {
        let path = self.upload_dir(id)?.join(CONFIG_FILE);
        let buffer = match fs::read(&path) {
            Ok(buffer) => buffer,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&buffer)?))
    }

    /// Serialize the document and replace the previous one atomically
    /// (write to a temp file in the same directory, sync, rename).
    fn write_upload(&self, upload: &Upload) -> Result<(), MetadataError> {
        let directory = self.upload_dir(&upload.id)?;
        fs::create_dir_all(&directory)?;

        let data = serde_json::to_vec_pretty(upload)?;
        let tmp_path = directory.join(".config.tmp");
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(&data)?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, directory.join(CONFIG_FILE))?;
        Ok(())
    }

    /// Read-merge-write under the per-upload lock.
    fn mutate(
        &self,
        upload_id: &str,
        apply: impl FnOnce(&mut Upload) -> Result<bool, MetadataError>,
    ) -> Result<bool, MetadataError> {
        self.locks.with_lock(upload_id, || {
            let mut upload = self
                .read_upload(upload_id)?
                .ok_or_else(|| MetadataError::UploadNotFound(upload_id.to_string()))?;
            let changed = apply(&mut upload)?;
            if changed {
                self.write_upload(&upload)?;
            }
            Ok(changed)
        })
    }

    /// Walk every `.config` under the shard directories.
    fn for_each_document(
        &self,
        visit: &mut dyn FnMut(Upload) -> Result<(), MetadataError>,
    ) -> Result<(), MetadataError> {
        let shards = match fs::read_dir(&self.directory) {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for shard in shards {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let buffer = match fs::read(entry.path().join(CONFIG_FILE)) {
                    Ok(buffer) => buffer,
                    // Upload deleted between listing and read.
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                visit(serde_json::from_slice(&buffer)?)?;
            }
        }
        Ok(())
    }
}

impl MetadataBackend for FsMetadataBackend {
    fn create_upload(&self, upload: &Upload) -> Result<(), MetadataError> {
        let directory = self.upload_dir(&upload.id)?;
        fs::create_dir_all(&directory)?;

        // create_new makes per-ID insertion atomic.
        let data = serde_json::to_vec_pretty(upload)?;
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(directory.join(CONFIG_FILE))
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MetadataError::Conflict(upload.id.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(())
    }

    fn get_upload(&self, id: &str) -> Result<Option<Upload>, MetadataError> {
        if id.len() < 3 || !id.is_ascii() {
            return Ok(None);
        }
        self.read_upload(id)
    }

    fn add_or_update_file(&self, upload_id: &str, file: &File) -> Result<(), MetadataError> {
        self.mutate(upload_id, |upload| {
            upload.files.insert(file.id.clone(), file.clone());
            Ok(true)
        })?;
        Ok(())
    }

    fn update_file_status(
        &self,
        upload_id: &str,
        file_id: &str,
        from: FileStatus,
        to: FileStatus,
    ) -> Result<bool, MetadataError> {
        self.mutate(upload_id, |upload| match upload.files.get_mut(file_id) {
            Some(file) if file.status == from && from.can_transition_to(to) => {
                file.status = to;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn remove_file(&self, upload_id: &str, file_id: &str) -> Result<(), MetadataError> {
        let result = self.mutate(upload_id, |upload| {
            Ok(upload.files.remove(file_id).is_some())
        });
        match result {
            Ok(_) => Ok(()),
            // Removing a file from a vanished upload is still a success.
            Err(MetadataError::UploadNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete_upload(&self, id: &str) -> Result<(), MetadataError> {
        let directory = match self.upload_dir(id) {
            Ok(directory) => directory,
            Err(_) => return Ok(()),
        };
        match fs::remove_dir_all(&directory) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn for_each_expired_upload(
        &self,
        now: DateTime<Utc>,
        visit: UploadVisitor,
    ) -> Result<(), MetadataError> {
        // No secondary index on disk: the scan reads every document and
        // filters on the expiration it carries.
        self.for_each_document(&mut |upload| {
            if upload.is_expired(now) {
                visit(upload)?;
            }
            Ok(())
        })
    }

    fn for_each_removed_file(&self, visit: FileVisitor) -> Result<(), MetadataError> {
        self.for_each_document(&mut |upload| {
            for file in upload.files.into_values() {
                if file.status.is_purgeable() {
                    visit(file)?;
                }
            }
            Ok(())
        })
    }

    fn for_each_upload(&self, visit: UploadVisitor) -> Result<(), MetadataError> {
        self.for_each_document(visit)
    }

    fn for_each_file(&self, visit: FileVisitor) -> Result<(), MetadataError> {
        self.for_each_document(&mut |upload| {
            for file in upload.files.into_values() {
                visit(file)?;
            }
            Ok(())
        })
    }
}
