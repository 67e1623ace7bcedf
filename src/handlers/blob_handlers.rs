//! Serves stored image payloads behind the URLs handed out at upload time.

use crate::{
    backends::{BlobHandle, decode_path_segment},
    errors::{AppError, ServiceError},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};

/// `GET /o/{encoded_path}` — stream a blob.
pub async fn get_blob(
    State(state): State<AppState>,
    Path(encoded): Path<String>,
) -> Result<Response, AppError> {
    let path = decode_path_segment(&encoded)
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "unknown blob"))?;
    let reader = state
        .objects
        .read(&path)
        .await
        .map_err(ServiceError::from)?;

    let mut response = Response::new(Body::from_stream(reader.body));
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), &reader.handle);
    Ok(response)
}

fn set_blob_headers(headers: &mut HeaderMap, handle: &BlobHandle) {
    let content_type = handle
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(handle.size_bytes));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=3600"),
    );
}
