//! HTTP API handlers

pub mod exports;
pub mod health;
pub mod pipeline;
pub mod reports;

pub use exports::export_routes;
pub use health::health_routes;
pub use pipeline::pipeline_routes;
pub use reports::report_routes;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::ApiError;

/// Requester identity from the `x-user-id` header.
///
/// Authentication itself is an upstream collaborator; by the time a request
/// reaches this service the gateway has verified the user and stamped the
/// header. Access control against that identity (the membership join) still
/// happens here on every read.
pub fn require_user(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let value = headers
        .get("x-user-id")
        .ok_or_else(|| ApiError::Unauthorized("Missing x-user-id header".to_string()))?;
    let value = value
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid x-user-id header".to_string()))?;
    Uuid::parse_str(value)
        .map_err(|_| ApiError::Unauthorized("Invalid x-user-id header".to_string()))
}
