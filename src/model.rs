use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an uploaded file.
///
/// Transitions only move forward:
/// `missing -> uploading -> uploaded -> {downloaded, removed} -> deleted`.
/// `removed` is a soft delete: the bytes may still exist until the cleaner
/// runs, but the file must be treated as unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Missing,
    Uploading,
    Uploaded,
    Downloaded,
    Removed,
    Deleted,
}

impl FileStatus {
    /// Position along the lifecycle, used to forbid backwards transitions.
    /// `downloaded` and `removed` are parallel branches at the same depth.
    fn rank(self) -> u8 {
        match self {
            FileStatus::Missing => 0,
            FileStatus::Uploading => 1,
            FileStatus::Uploaded => 2,
            FileStatus::Downloaded | FileStatus::Removed => 3,
            FileStatus::Deleted => 4,
        }
    }

    /// Whether moving from `self` to `to` is a legal forward transition.
    pub fn can_transition_to(self, to: FileStatus) -> bool {
        self.rank() < to.rank()
    }

    /// Whether the file's bytes are eligible for purge by the cleaner.
    /// `downloaded` counts: one-shot files keep their status after the
    /// first download but their bytes must still go away.
    pub fn is_purgeable(self) -> bool {
        matches!(self, FileStatus::Removed | FileStatus::Downloaded)
    }
}

/// One uploaded file belonging to exactly one upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub upload_id: String,
    pub name: String,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,

    /// Content type declared by the client, if any.
    #[serde(default)]
    pub declared_type: Option<String>,
    /// Content type detected server-side (from the file name).
    #[serde(default)]
    pub detected_type: Option<String>,
    /// Final byte count, known only once the upload completes.
    #[serde(default)]
    pub size: u64,
    /// Hex MD5 of the content, computed while streaming the upload body.
    #[serde(default)]
    pub md5: Option<String>,
    /// Opaque backend-specific details (storage path, volume id, ...).
    /// Only the data backend that wrote it interprets it; the metadata
    /// backend stores and returns it verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_details: Option<serde_json::Value>,
}

impl File {
    pub fn new(upload_id: &str, name: &str) -> Self {
        Self {
            id: new_id(),
            upload_id: upload_id.to_string(),
            name: name.to_string(),
            status: FileStatus::Missing,
            created_at: Utc::now(),
            declared_type: None,
            detected_type: None,
            size: 0,
            md5: None,
            backend_details: None,
        }
    }

    /// Copy with backend internals stripped, safe to hand to clients.
    pub fn sanitized(&self) -> Self {
        let mut file = self.clone();
        file.backend_details = None;
        file
    }
}

/// A container created by a client, holding zero or more files, with its
/// own expiration and access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub created_at: DateTime<Utc>,

    /// Requested seconds-to-live. Negative means "never expires".
    pub ttl: i64,
    /// Absolute expiration instant, absent for infinite uploads.
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,

    /// Capability secret returned only to the creator; required for the
    /// creator's own mutating calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Optional HTTP Basic protection. The raw password is never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    /// Address the upload was created from, stripped on sanitize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,

    /// Free-text comment shown alongside the upload.
    #[serde(default)]
    pub comment: Option<String>,

    // Policy flags, immutable after creation.
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default)]
    pub removable: bool,
    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub files: HashMap<String, File>,
}

impl Upload {
    /// Create a fresh upload with a random ID and creator token.
    /// TTL policy (default / maximum) is applied by the service layer.
    pub fn new() -> Self {
        Self {
            id: new_id(),
            created_at: Utc::now(),
            ttl: 0,
            expire_at: None,
            token: Some(new_id()),
            login: None,
            password_hash: None,
            remote_ip: None,
            comment: None,
            one_shot: false,
            removable: false,
            stream: false,
            files: HashMap::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expire_at {
            Some(expire_at) => expire_at <= now,
            None => false,
        }
    }

    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Copy with secrets and backend internals stripped, safe to serialize
    /// in any client-visible response.
    pub fn sanitized(&self) -> Self {
        let mut upload = self.clone();
        upload.token = None;
        upload.password_hash = None;
        upload.remote_ip = None;
        for file in upload.files.values_mut() {
            file.backend_details = None;
        }
        upload
    }
}

impl Default for Upload {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate an opaque random identifier. The simple (dash-free) format
/// keeps `id[..2]` usable as a shard directory name.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
