use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::response::{ApiError, AppQuery, JSend};
use crate::model::{File, Upload};
use crate::AppState;

pub async fn health() -> Json<JSend<serde_json::Value>> {
    JSend::success(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub expired_uploads: u64,
    pub purged_files: u64,
    pub purged_uploads: u64,
    pub errors: u64,
}

/// Manual garbage-collection trigger for admin tooling; runs the same
/// three-phase pass as the background loop.
pub async fn clean(State(state): State<Arc<AppState>>) -> Json<JSend<CleanResponse>> {
    let stats = state.cleaner.clean().await;
    JSend::success(CleanResponse {
        expired_uploads: stats.expired_uploads,
        purged_files: stats.purged_files,
        purged_uploads: stats.purged_uploads,
        errors: stats.errors,
    })
}

#[derive(Debug, Deserialize)]
pub struct ListUploadsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

/// Admin listing over every stored upload (sanitized).
pub async fn list_uploads(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListUploadsParams>,
) -> Result<Json<JSend<Vec<Upload>>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let mut uploads = Vec::new();
    state
        .service
        .metadata()
        .for_each_upload(&mut |upload| {
            uploads.push(upload.sanitized());
            Ok(())
        })
        .map_err(|e| ApiError::internal(e.to_string()))?;

    uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let page = uploads
        .into_iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .collect();

    Ok(JSend::success(page))
}

/// Admin listing over every stored file (sanitized).
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListUploadsParams>,
) -> Result<Json<JSend<Vec<File>>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let mut files = Vec::new();
    state
        .service
        .metadata()
        .for_each_file(&mut |file| {
            files.push(file.sanitized());
            Ok(())
        })
        .map_err(|e| ApiError::internal(e.to_string()))?;

    files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let page = files
        .into_iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .collect();

    Ok(JSend::success(page))
}
