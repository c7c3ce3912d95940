use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::store::WriteConflict;

/// Error response type
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// Response type for health check endpoint
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Response type for unhealthy status
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct UnhealthyResponse {
    pub status: String,
    pub error: String,
}

/// Custom error type for API endpoints
///
/// Every handler returns this type so that failures map onto a consistent
/// HTTP status and a JSON `{ "error": ... }` body.
#[derive(Debug)]
pub enum ApiError {
    /// Invalid UUID format in path or body
    InvalidUuid(String),
    /// Request body failed a domain check
    Validation(String),
    /// Invalid query parameter
    InvalidQueryParam(String),
    /// Referenced record does not exist
    NotFound { kind: &'static str, id: String },
    /// Request conflicts with the current state of a record
    Conflict(String),
    /// Database operation error
    DatabaseError(anyhow::Error),
    /// JSON parsing error
    JsonError(serde_json::Error),
}

impl ApiError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ApiError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidUuid(id) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid UUID format: expected format like '550e8400-e29b-41d4-a716-446655440000', got '{}'", id),
            ),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InvalidQueryParam(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid query parameter: {}", msg),
            ),
            ApiError::NotFound { kind, id } => (
                StatusCode::NOT_FOUND,
                format!("{} not found: {}", kind, id),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Database error: {}", err),
                )
            }
            ApiError::JsonError(err) => (
                StatusCode::BAD_REQUEST,
                format!("JSON parse error: {}", err),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::InvalidUuid(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<WriteConflict>() {
            Ok(conflict) => ApiError::Conflict(conflict.0),
            Err(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::JsonError(err)
    }
}
