//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that pings the document and object stores

use crate::{backends::BackendResult, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness probe. Always 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Pings both stores. For the durable backends that is a `SELECT 1` against
/// SQLite and a write/read/delete round trip under the storage directory.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (documents, objects) = tokio::join!(state.documents.ping(), state.objects.ping());

    let mut checks = HashMap::new();
    checks.insert("documents", check(state.documents.backend_tag(), documents));
    checks.insert("objects", check(state.objects.backend_tag(), objects));

    let overall_ok = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        tracing::warn!("readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

fn check(backend: &'static str, outcome: BackendResult<()>) -> CheckStatus {
    CheckStatus {
        backend,
        ok: outcome.is_ok(),
        error: outcome.err().map(|e| e.to_string()),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    backend: &'static str,
    ok: bool,
    error: Option<String>,
}
