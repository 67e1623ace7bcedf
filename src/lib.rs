//! Clinostat image log: setups, image uploads and per-image display
//! parameters behind a small JSON API.

pub mod backends;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use state::AppState;

/// The complete HTTP application over `state`.
pub fn app(state: AppState, max_request_bytes: usize) -> Router {
    routes::routes::routes(max_request_bytes).with_state(state)
}
