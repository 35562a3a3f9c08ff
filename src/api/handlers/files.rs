use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};

use super::uploads::upload_token;
use crate::api::response::{ApiError, JSend};
use crate::model::File;
use crate::service::{AddFile, Credentials};
use crate::AppState;

/// Attach a file to an upload. The multipart `file` field is streamed
/// straight into the data backend; for stream uploads this request blocks
/// until the matching download has drained the bytes.
pub async fn add_file(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<JSend<File>>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::bad_request("file field must carry a filename"))?;
        let declared_type = field.content_type().map(|s| s.to_string());

        let reader = StreamReader::new(field.map_err(io::Error::other));
        let file = state
            .service
            .add_file(
                &upload_id,
                upload_token(&headers),
                AddFile {
                    name,
                    declared_type,
                },
                Box::new(reader),
            )
            .await?;

        return Ok(JSend::success(file.sanitized()));
    }

    Err(ApiError::bad_request("file field is required"))
}

/// Stream a file's bytes to the client, honoring password protection,
/// expiry and the one-shot policy.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((upload_id, file_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let credentials = basic_credentials(&headers);
    let (file, reader) = state
        .service
        .get_file(&upload_id, &file_id, credentials)
        .await?;

    let content_type = file
        .detected_type
        .or(file.declared_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.name.replace('"', "")),
        );
    // Stream uploads have no known size until the rendezvous finishes.
    if file.size > 0 {
        builder = builder.header(header::CONTENT_LENGTH, file.size);
    }

    builder
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| ApiError::internal(e.to_string()))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path((upload_id, file_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<JSend<()>>, ApiError> {
    state
        .service
        .remove_file(&upload_id, &file_id, upload_token(&headers))?;
    Ok(JSend::success(()))
}

/// Parse `Authorization: Basic ...` into credentials, if present and valid.
fn basic_credentials(headers: &HeaderMap) -> Option<Credentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (login, password) = decoded.split_once(':')?;
    Some(Credentials {
        login: login.to_string(),
        password: password.to_string(),
    })
}
