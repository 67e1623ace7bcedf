//! HTTP handlers for the images of one setup: listing, the live snapshot
//! stream, multipart upload, edits and deletion.

use crate::{
    errors::AppError,
    handlers::{session_handlers::CurrentUser, setup_handlers::ConfirmQuery},
    models::{
        image::{ImageEdit, SortOrder},
        scope::SetupScope,
        upload::{CandidateFile, UploadState},
    },
    services::image_sync::{GalleryEntry, ImageSynchronizer},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Deserialize, Default)]
pub struct OrderQuery {
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Serialize)]
struct UploadStateResponse {
    state: UploadState,
    max_image_bytes: u64,
}

/// Resolve the caller's scope, failing with 404 for setups they do not own.
async fn scope_for(state: &AppState, current: &CurrentUser, setup_id: Uuid) -> Result<SetupScope, AppError> {
    state.setups.get_setup(&current.user.id, setup_id).await?;
    Ok(SetupScope::new(current.user.id.as_str(), setup_id))
}

/// `GET /setups/{setup_id}/images?order=asc|desc`
pub async fn list_images(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(setup_id): Path<Uuid>,
    Query(q): Query<OrderQuery>,
) -> Result<impl IntoResponse, AppError> {
    let scope = scope_for(&state, &current, setup_id).await?;
    let images = state.images.list(&scope, q.order).await?;
    Ok(Json(images))
}

/// `GET /setups/{setup_id}/images/live` — server-sent `snapshot` events,
/// each carrying the full ordered gallery.
///
/// The subscription lives as long as the response stream; a client that
/// disconnects drops it.
pub async fn live_images(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(setup_id): Path<Uuid>,
    Query(q): Query<OrderQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let scope = scope_for(&state, &current, setup_id).await?;

    let (tx, rx) = watch::channel(Vec::<GalleryEntry>::new());
    let mut sync = ImageSynchronizer::new(state.images.clone());
    sync.reorder(q.order);
    sync.subscribe(scope.clone(), move |entries: &[GalleryEntry]| {
        tx.send_replace(entries.to_vec());
    });
    debug!(scope = %scope, "live image stream opened");

    let events = stream::unfold((sync, rx), |(sync, mut rx)| async move {
        rx.changed().await.ok()?;
        let entries = rx.borrow_and_update().clone();
        let event = Event::default().event("snapshot").json_data(&entries);
        Some((event, (sync, rx)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// `POST /setups/{setup_id}/images` — multipart upload.
///
/// Every part carrying a file name is a candidate; other parts are ignored.
pub async fn upload_images(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(setup_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut candidates = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let media_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        candidates.push(CandidateFile::new(name, media_type, bytes));
    }

    let report = state
        .uploads
        .submit(&current.user, Some(setup_id), candidates)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// `GET /uploads` — whether an upload of the caller is running.
pub async fn upload_state(State(state): State<AppState>, current: CurrentUser) -> impl IntoResponse {
    Json(UploadStateResponse {
        state: state.uploads.state(&current.user.id),
        max_image_bytes: state.uploads.max_image_bytes(),
    })
}

/// `PATCH /setups/{setup_id}/images/{image_id}` — replace crop, zoom and
/// timestamp.
pub async fn edit_image(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((setup_id, image_id)): Path<(Uuid, Uuid)>,
    Json(edit): Json<ImageEdit>,
) -> Result<impl IntoResponse, AppError> {
    let fields = edit.validate()?;
    let scope = SetupScope::new(current.user.id.as_str(), setup_id);
    let record = state.images.apply_edit(&scope, image_id, &fields).await?;
    Ok(Json(record))
}

/// `DELETE /setups/{setup_id}/images/{image_id}?confirm=true`
pub async fn delete_image(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((setup_id, image_id)): Path<(Uuid, Uuid)>,
    Query(q): Query<ConfirmQuery>,
) -> Result<impl IntoResponse, AppError> {
    let scope = SetupScope::new(current.user.id.as_str(), setup_id);
    state.images.delete(&scope, image_id, &q.confirm).await?;
    Ok(StatusCode::NO_CONTENT)
}
