use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::model::Upload;
use crate::service::CreateUpload;
use crate::AppState;

/// Header carrying the creator's capability token.
pub(super) const UPLOAD_TOKEN_HEADER: &str = "x-upload-token";

pub(super) fn upload_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(UPLOAD_TOKEN_HEADER).and_then(|v| v.to_str().ok())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUploadRequest {
    pub ttl: i64,
    pub one_shot: bool,
    pub removable: bool,
    pub stream: bool,
    pub login: Option<String>,
    pub password: Option<String>,
    pub comment: Option<String>,
}

pub async fn create_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(req): AppJson<CreateUploadRequest>,
) -> Result<Json<JSend<Upload>>, ApiError> {
    let remote_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());

    let upload = state.service.create_upload(CreateUpload {
        ttl: req.ttl,
        one_shot: req.one_shot,
        removable: req.removable,
        stream: req.stream,
        login: req.login,
        password: req.password,
        comment: req.comment,
        remote_ip,
    })?;

    // The creation response is the only place the token appears; it is
    // otherwise stripped along with the other secrets.
    let mut response = upload.sanitized();
    response.token = upload.token;
    Ok(JSend::success(response))
}

pub async fn get_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<Upload>>, ApiError> {
    let upload = state.service.get_upload(&id)?;
    Ok(JSend::success(upload.sanitized()))
}

pub async fn delete_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JSend<()>>, ApiError> {
    state
        .service
        .remove_upload(&id, upload_token(&headers))
        .await?;
    Ok(JSend::success(()))
}
