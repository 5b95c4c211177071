//! Axum-specific error types and mappings from the core error kinds to
//! HTTP status codes and JSON response bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use jimaku_core::{PipelineError, StorageError, StoreError};

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (invalid input or failed task).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Backing service down.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            HttpError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => HttpError::NotFound(format!("task not found: {id}")),
            StoreError::IllegalTransition { .. } => HttpError::BadRequest(err.to_string()),
            StoreError::Storage(msg) => HttpError::Internal(format!("storage: {msg}")),
        }
    }
}

impl From<StorageError> for HttpError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => HttpError::NotFound(format!("object not found: {key}")),
            StorageError::Unavailable(msg) => HttpError::ServiceUnavailable(msg),
            StorageError::PermissionDenied(msg) => HttpError::Internal(format!("permission: {msg}")),
        }
    }
}

impl From<PipelineError> for HttpError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Input(msg) => HttpError::BadRequest(msg),
            PipelineError::Upstream(msg) | PipelineError::Storage(msg) => {
                HttpError::ServiceUnavailable(msg)
            }
            other => HttpError::Internal(other.to_string()),
        }
    }
}
