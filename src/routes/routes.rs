//! Defines routes for the image log API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Session** (`Authorization: Bearer <token>` on everything below)
//!   - `POST   /accounts` — sign up
//!   - `POST   /session` — sign in
//!   - `GET    /session` — current user
//!   - `DELETE /session` — sign out
//!
//! - **Setups**
//!   - `GET    /setups` — list
//!   - `POST   /setups` — create
//!   - `DELETE /setups/{setup_id}?confirm=true` — delete with all images
//!
//! - **Images**
//!   - `GET    /setups/{setup_id}/images?order=asc|desc` — list
//!   - `GET    /setups/{setup_id}/images/live` — SSE snapshots
//!   - `POST   /setups/{setup_id}/images` — multipart upload
//!   - `PATCH  /setups/{setup_id}/images/{image_id}` — edit crop/zoom/time
//!   - `DELETE /setups/{setup_id}/images/{image_id}?confirm=true`
//!   - `GET    /uploads` — upload state of the caller
//!
//! - **Blobs**
//!   - `GET    /o/{encoded_path}` — download a stored image

use crate::{
    handlers::{
        blob_handlers::get_blob,
        health_handlers::{healthz, readyz},
        image_handlers::{
            delete_image, edit_image, list_images, live_images, upload_state, upload_images,
        },
        session_handlers::{current_session, sign_in, sign_out, sign_up},
        setup_handlers::{create_setup, delete_setup, list_setups},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
};

/// Build and return the router for the whole API.
///
/// `max_request_bytes` caps every request body, multipart uploads included.
pub fn routes(max_request_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/accounts", post(sign_up))
        .route(
            "/session",
            get(current_session).post(sign_in).delete(sign_out),
        )
        .route("/setups", get(list_setups).post(create_setup))
        .route("/setups/{setup_id}", delete(delete_setup))
        .route(
            "/setups/{setup_id}/images",
            get(list_images).post(upload_images),
        )
        .route("/setups/{setup_id}/images/live", get(live_images))
        .route(
            "/setups/{setup_id}/images/{image_id}",
            patch(edit_image).delete(delete_image),
        )
        .route("/uploads", get(upload_state))
        .route("/o/{encoded_path}", get(get_blob))
        .layer(DefaultBodyLimit::max(max_request_bytes))
}
