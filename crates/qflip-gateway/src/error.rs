//! Error types for the Gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use qflip_core::CoreError;
use thiserror::Error;

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded for {0}")]
    RateLimitExceeded(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Agent error: {0}")]
    Agent(#[from] CoreError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            GatewayError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "success": false, "message": msg }),
            ),
            GatewayError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "success": false, "message": msg }),
            ),
            GatewayError::RateLimitExceeded(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                serde_json::json!({ "success": false, "message": "Too many requests" }),
            ),
            GatewayError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "success": false, "message": "Endpoint not found" }),
            ),
            GatewayError::Agent(
                e @ (CoreError::BatchTooLarge { .. } | CoreError::EmptyBatch),
            ) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "success": false, "message": e.to_string() }),
            ),
            GatewayError::Agent(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "success": false,
                    "message": "Quantum agent error",
                    "error": e.to_string(),
                }),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "success": false, "message": "Server error" }),
            ),
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, Json(body)).into_response()
    }
}

/// Result type for Gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
