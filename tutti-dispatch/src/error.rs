//! Error types for tutti-dispatch
//!
//! `EngineError` is what the dispatch engine returns; `ApiError` maps it onto
//! HTTP status codes and the JSON error envelope.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tutti_common::db::RequestStatus;
use uuid::Uuid;

/// Message shown for unknown and expired links alike
pub const INVALID_LINK_MESSAGE: &str = "This response link is invalid or has expired";

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// No token matches the presented string
    #[error("Response token not found")]
    TokenNotFound,

    /// Token exists but its expiry has passed
    #[error("Response token expired")]
    TokenExpired,

    /// Token was already consumed by an earlier submission
    #[error("Response token already used")]
    TokenAlreadyUsed,

    /// The request behind the token is no longer open
    #[error("Request is no longer pending (status: {0})")]
    RequestNotPending(RequestStatus),

    /// Need definition or lifecycle change rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Need not found: {0}")]
    NeedNotFound(Uuid),

    /// Referenced project, position or list does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A computed dispatch would break a strategy's concurrency rule
    #[error("Dispatch invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] tutti_common::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed body, query or path (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Engine failure, mapped by kind
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Engine(err) => match err {
                // Unknown and expired links are indistinguishable to the caller
                EngineError::TokenNotFound | EngineError::TokenExpired => (
                    StatusCode::NOT_FOUND,
                    "INVALID_LINK",
                    INVALID_LINK_MESSAGE.to_string(),
                ),
                EngineError::TokenAlreadyUsed => (
                    StatusCode::BAD_REQUEST,
                    "ALREADY_RESPONDED",
                    "This response link has already been used".to_string(),
                ),
                EngineError::RequestNotPending(status) => (
                    StatusCode::BAD_REQUEST,
                    "REQUEST_CLOSED",
                    format!("This request is no longer open ({})", status),
                ),
                EngineError::InvalidConfiguration(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_CONFIGURATION", msg)
                }
                err @ EngineError::NeedNotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
                }
                EngineError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                err @ EngineError::InvariantViolation(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INVARIANT_VIOLATION",
                    err.to_string(),
                ),
                err @ (EngineError::Database(_) | EngineError::Common(_)) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    err.to_string(),
                ),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

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
