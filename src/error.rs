//! Error types for medpipe
//!
//! Two layers, validated at their own boundary: `Error` for the job store and
//! sequencer, `ApiError` for the HTTP surface. Access-denied and not-found are
//! collapsed into a single `NotFound` so responses never leak whether a job
//! exists outside the requester's team.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for store and pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Store and sequencer errors
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested record not found (or not visible to the requester)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Status transition that would move a job or step backwards
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Operation attempted against a job in the wrong state
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Step execution failure reported by an executor
    #[error("Step failed: {0}")]
    StepFailed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error type, mapped onto HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed requester identity (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found or not accessible (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., cancelling an already-terminal job
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Store error, mapped by kind
    #[error("{0}")]
    Store(#[from] Error),
}

impl ApiError {
    /// Status, machine-readable code and message for the error envelope.
    /// Store errors are mapped by kind here, so every variant has one arm.
    fn response_parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Store(err) => match err {
                Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
                Error::InvalidTransition(msg) | Error::PreconditionFailed(msg) => {
                    (StatusCode::CONFLICT, "CONFLICT", msg)
                }
                other => {
                    // Full detail stays server-side; the caller gets a generic 500
                    tracing::error!(error = %other, "Store error surfaced to API");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal server error".to_string(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.response_parts();

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_by_kind() {
        let cases = [
            (
                ApiError::Store(Error::NotFound("x".into())),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                ApiError::Store(Error::InvalidInput("x".into())),
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
            ),
            (
                ApiError::Store(Error::InvalidTransition("x".into())),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
            (
                ApiError::Store(Error::PreconditionFailed("x".into())),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
            (
                ApiError::Store(Error::Internal("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let (got_status, got_code, _) = err.response_parts();
            assert_eq!(got_status, status);
            assert_eq!(got_code, code);
        }
    }

    #[test]
    fn internal_detail_is_not_echoed() {
        let err = ApiError::Store(Error::Database(sqlx::Error::PoolClosed));
        let (status, _, message) = err.response_parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Internal server error");
    }
}
