//! filedrop - a file-sharing server with policy-driven lifecycles
//!
//! Clients create an upload container, attach files to it, and later
//! retrieve or delete them under expiration, one-shot, password and
//! removability policies. The crate provides:
//! - Pluggable metadata backends (embedded redb with an expiry index, or
//!   a sharded-filesystem JSON store with per-upload locking)
//! - Pluggable data backends (sharded local filesystem, or an in-memory
//!   rendezvous pipe that never persists bytes)
//! - A three-phase garbage collector reconciling the two stores
//! - REST API with streaming multipart upload and download

pub mod api;
pub mod cleaner;
pub mod config;
pub mod data;
pub mod metadata;
pub mod model;
pub mod password;
pub mod service;

use std::sync::Arc;

use cleaner::Cleaner;
use config::Config;
use service::UploadService;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub service: UploadService,
    pub cleaner: Arc<Cleaner>,
}
