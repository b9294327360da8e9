//! Blob serving.

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
};

use crate::errors::AppError;
use crate::AppState;

/// GET /files/:blob_id - Serve a cached blob with its stored content type.
pub async fn serve_blob(State(state): State<AppState>, Path(blob_id): Path<String>) -> Result<Response, AppError> {
    let blob = state.blobs.get(&blob_id).await?;

    let content_type = if blob.content_type.trim().is_empty() {
        mime_guess::from_path(&blob.name)
            .first_or_octet_stream()
            .to_string()
    } else {
        blob.content_type
    };

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=86400, immutable")
        .body(Body::from(blob.data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
