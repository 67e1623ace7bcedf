use crate::backends::BackendError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{error::Error as _, fmt};
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the setup registry, image synchronizer and upload
/// pipeline.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Bad user input, caught before any backend call.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The document store, object store or identity provider failed.
    #[error("backend unavailable")]
    BackendUnavailable(#[source] BackendError),
    /// Setup cascade stopped midway; the setup record is kept.
    #[error(
        "setup {setup_id} partially deleted: {removed} image(s) removed, {remaining} remaining"
    )]
    PartialDeletion {
        setup_id: Uuid,
        removed: usize,
        remaining: usize,
        #[source]
        source: BackendError,
    },
    /// Blob removed but the metadata record survived.
    #[error("image {image_id} blob was removed but its record could not be deleted")]
    DanglingImage {
        image_id: Uuid,
        #[source]
        source: BackendError,
    },
    #[error("no setup selected")]
    NoSetupSelected,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} was not confirmed")]
    Cancelled(String),
    #[error("an upload is already in progress")]
    UploadInProgress,
}

impl From<BackendError> for ServiceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(what) => ServiceError::NotFound(what),
            other => ServiceError::BackendUnavailable(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A lightweight wrapper for errors leaving the HTTP layer.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::Validation(_)
            | ServiceError::NoSetupSelected
            | ServiceError::Cancelled(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::UploadInProgress => StatusCode::CONFLICT,
            ServiceError::PartialDeletion { .. } | ServiceError::DanglingImage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Append the cause chain.
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), "{}", message);
        }
        AppError::new(status, message)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
