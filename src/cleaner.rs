//! Background garbage collection.
//!
//! Uploads and files disappear two ways: explicit removal (soft delete,
//! status `removed`) and TTL expiry. Either way, the bytes outlive the
//! decision for a while; the cleaner reconciles the two stores in three
//! strictly sequential, individually idempotent phases:
//!
//! 1. mark every live file of every expired upload as `removed`
//! 2. delete purgeable bytes from the data backend, flipping survivors'
//!    metadata to `deleted`; per-file failures are counted and retried on
//!    the next pass
//! 3. drop the metadata of expired uploads once none of their files hold
//!    undeleted bytes

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::data::DataBackend;
use crate::metadata::{MetadataBackend, MetadataError};
use crate::model::FileStatus;

/// Counters reported once per cleaning pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanStats {
    /// Uploads whose files were soft-deleted because the upload expired.
    pub expired_uploads: u64,
    /// Files whose bytes were deleted from the data backend.
    pub purged_files: u64,
    /// Upload records fully removed from the metadata backend.
    pub purged_uploads: u64,
    /// Individual item failures; each is retried on the next pass.
    pub errors: u64,
}

pub struct Cleaner {
    metadata: Arc<dyn MetadataBackend>,
    data: Arc<dyn DataBackend>,
    min_interval: Duration,
    max_interval: Duration,
}

impl Cleaner {
    pub fn new(
        metadata: Arc<dyn MetadataBackend>,
        data: Arc<dyn DataBackend>,
        min_interval: Duration,
        max_interval: Duration,
    ) -> Self {
        Self {
            metadata,
            data,
            min_interval,
            max_interval,
        }
    }

    /// Run cleaning passes forever, sleeping a random duration between the
    /// configured bounds after each one. The jitter keeps multiple server
    /// instances sharing a backend from sweeping simultaneously.
    pub async fn run(self: Arc<Self>) {
        loop {
            let sleep_secs = rand::thread_rng()
                .gen_range(self.min_interval.as_secs()..=self.max_interval.as_secs());
            tracing::info!(sleep_secs, "next cleaning pass scheduled");
            tokio::time::sleep(Duration::from_secs(sleep_secs)).await;

            let stats = self.clean().await;
            tracing::info!(
                expired_uploads = stats.expired_uploads,
                purged_files = stats.purged_files,
                purged_uploads = stats.purged_uploads,
                errors = stats.errors,
                "cleaning pass complete"
            );
        }
    }

    /// One full cleaning pass. Individual item failures never abort the
    /// pass; they surface as an aggregate count in the returned stats.
    pub async fn clean(&self) -> CleanStats {
        let mut stats = CleanStats::default();
        let now = Utc::now();

        self.soft_delete_expired(&mut stats, now);
        self.purge_removed_files(&mut stats).await;
        self.purge_empty_uploads(&mut stats, now);

        stats
    }

    /// Phase 1: soft-delete every expired upload's live files.
    fn soft_delete_expired(&self, stats: &mut CleanStats, now: chrono::DateTime<Utc>) {
        let result = self.metadata.for_each_expired_upload(now, &mut |upload| {
            let mut touched = false;
            for file in upload.files.values() {
                if !file.status.can_transition_to(FileStatus::Removed) {
                    continue;
                }
                match self.metadata.update_file_status(
                    &upload.id,
                    &file.id,
                    file.status,
                    FileStatus::Removed,
                ) {
                    Ok(updated) => touched |= updated,
                    Err(e) => {
                        tracing::warn!(
                            upload_id = %upload.id,
                            file_id = %file.id,
                            error = %e,
                            "failed to soft-delete expired file, will retry"
                        );
                        stats.errors += 1;
                    }
                }
            }
            if touched {
                stats.expired_uploads += 1;
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "expired upload scan failed");
            stats.errors += 1;
        }
    }

    /// Phase 2: delete purgeable bytes, then flip metadata to `deleted`.
    async fn purge_removed_files(&self, stats: &mut CleanStats) {
        let mut purgeable = Vec::new();
        let result = self.metadata.for_each_removed_file(&mut |file| {
            purgeable.push(file);
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "removed file scan failed");
            stats.errors += 1;
        }

        for file in purgeable {
            if let Err(e) = self.data.remove_file(&file).await {
                tracing::warn!(
                    upload_id = %file.upload_id,
                    file_id = %file.id,
                    error = %e,
                    "failed to delete file bytes, will retry"
                );
                stats.errors += 1;
                continue;
            }
            match self.metadata.update_file_status(
                &file.upload_id,
                &file.id,
                file.status,
                FileStatus::Deleted,
            ) {
                Ok(true) => stats.purged_files += 1,
                // Already flipped by a concurrent pass; nothing new done.
                Ok(false) => {}
                // Upload vanished between scan and update.
                Err(MetadataError::UploadNotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(
                        upload_id = %file.upload_id,
                        file_id = %file.id,
                        error = %e,
                        "failed to update purged file status, will retry"
                    );
                    stats.errors += 1;
                }
            }
        }
    }

    /// Phase 3: purge metadata of expired uploads with no undeleted files.
    fn purge_empty_uploads(&self, stats: &mut CleanStats, now: chrono::DateTime<Utc>) {
        let mut done = Vec::new();
        let result = self.metadata.for_each_expired_upload(now, &mut |upload| {
            let drained = upload
                .files
                .values()
                .all(|f| f.status == FileStatus::Deleted);
            if drained {
                done.push(upload.id);
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "expired upload scan failed");
            stats.errors += 1;
        }

        for id in done {
            match self.metadata.delete_upload(&id) {
                Ok(()) => stats.purged_uploads += 1,
                Err(e) => {
                    tracing::warn!(upload_id = %id, error = %e, "failed to purge upload metadata");
                    stats.errors += 1;
                }
            }
        }
    }
}
