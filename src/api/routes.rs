use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    Router::new()
        // Uploads
        .route("/upload", post(handlers::create_upload))
        .route("/upload/:id", get(handlers::get_upload))
        .route("/upload/:id", delete(handlers::delete_upload))
        // Files
        .route(
            "/upload/:id/file",
            post(handlers::add_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/file/:upload_id/:file_id", get(handlers::download_file))
        .route("/file/:upload_id/:file_id", delete(handlers::delete_file))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .route("/_internal/uploads", get(handlers::list_uploads))
        .route("/_internal/files", get(handlers::list_files))
        .route("/_internal/clean", post(handlers::clean))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
