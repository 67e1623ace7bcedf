//! HTTP handlers for a user's setups.

use crate::{
    errors::AppError, handlers::session_handlers::CurrentUser, state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSetupReq {
    pub name: String,
}

/// `?confirm=true` acknowledgement for irreversible deletes.
#[derive(Debug, Deserialize, Default)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}

/// `GET /setups` — the caller's setups, oldest first.
///
/// Always 200: when the store is unreachable the listing is empty and
/// carries the error message.
pub async fn list_setups(State(state): State<AppState>, current: CurrentUser) -> impl IntoResponse {
    Json(state.setups.load(&current.user.id).await)
}

/// `POST /setups`
pub async fn create_setup(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreateSetupReq>,
) -> Result<impl IntoResponse, AppError> {
    let setup = state.setups.create_setup(&current.user.id, &req.name).await?;
    Ok((StatusCode::CREATED, Json(setup)))
}

/// `DELETE /setups/{setup_id}?confirm=true` — delete a setup and its images.
pub async fn delete_setup(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(setup_id): Path<Uuid>,
    Query(q): Query<ConfirmQuery>,
) -> Result<impl IntoResponse, AppError> {
    state
        .setups
        .delete_setup(&current.user.id, setup_id, &q.confirm)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
