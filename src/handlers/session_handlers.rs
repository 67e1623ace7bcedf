//! Session endpoints and the `CurrentUser` extractor.
//!
//! Sessions are opaque bearer tokens issued by the identity provider and
//! presented as `Authorization: Bearer <token>`.

use crate::{
    backends::BackendError,
    errors::AppError,
    models::session::{Credential, SessionUser},
    state::AppState,
};
use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{StatusCode, header, request::Parts},
    response::IntoResponse,
};
use serde::Serialize;

/// The signed-in user behind the request's bearer token.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub token: String,
    pub user: SessionUser,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

        let user = state
            .identity
            .resolve(token)
            .await
            .ok_or_else(|| AppError::unauthorized("session expired or unknown"))?;

        Ok(Self {
            token: token.to_string(),
            user,
        })
    }
}

#[derive(Serialize)]
struct SessionResponse {
    user: SessionUser,
    greeting: String,
}

/// `POST /accounts` — create an account and receive a bearer token.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(credential): Json<Credential>,
) -> Result<impl IntoResponse, AppError> {
    let signed_in = state
        .identity
        .sign_up(credential)
        .await
        .map_err(|err| identity_error(err, StatusCode::BAD_REQUEST))?;
    Ok((StatusCode::CREATED, Json(signed_in)))
}

/// `POST /session` — sign in and receive a bearer token.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(credential): Json<Credential>,
) -> Result<impl IntoResponse, AppError> {
    let signed_in = state
        .identity
        .sign_in(credential)
        .await
        .map_err(|err| identity_error(err, StatusCode::UNAUTHORIZED))?;
    Ok((StatusCode::CREATED, Json(signed_in)))
}

fn identity_error(err: BackendError, rejected: StatusCode) -> AppError {
    match err {
        BackendError::Rejected(msg) => AppError::new(rejected, msg),
        other => AppError::new(StatusCode::SERVICE_UNAVAILABLE, other.to_string()),
    }
}

/// `GET /session` — who is signed in.
pub async fn current_session(current: CurrentUser) -> impl IntoResponse {
    let greeting = current.user.greeting().to_string();
    Json(SessionResponse {
        user: current.user,
        greeting,
    })
}

/// `DELETE /session` — end the session behind the token.
pub async fn sign_out(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    state
        .identity
        .sign_out(&current.token)
        .await
        .map_err(|err| AppError::unauthorized(err.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
