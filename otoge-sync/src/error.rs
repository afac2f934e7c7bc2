//! Error types for otoge-sync
//!
//! Every layer's error funnels into `ApiError`, rendered as
//! `{"error": {"code": "...", "message": "..."}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use otoge_common::IdentityError;
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;
use crate::providers::{ProviderError, UnknownProviders};
use crate::services::ChainError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or unknown developer token (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Feature disabled by configuration (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Identity locked by another run (409, retryable)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Score store unreachable (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Upstream provider refused or failed a direct read
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// otoge-common error
    #[error("Common error: {0}")]
    Common(#[from] otoge_common::Error),
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<UnknownProviders> for ApiError {
    fn from(err: UnknownProviders) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Merge(e) => ApiError::BadRequest(e.to_string()),
            StoreError::Unavailable(e) => ApiError::Unavailable(e.to_string()),
            StoreError::Corrupt(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidIdentity(e) => e.into(),
            ChainError::Busy => ApiError::Conflict(err.to_string()),
            // Only reachable when the service is shutting down
            ChainError::Cancelled => ApiError::Unavailable(err.to_string()),
            ChainError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "BUSY", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", msg)
            }
            ApiError::Provider(err) => {
                let (status, code) = match &err {
                    ProviderError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "PROVIDER_UNAUTHORIZED"),
                    ProviderError::NotSupported(_) => (StatusCode::NOT_IMPLEMENTED, "NOT_SUPPORTED"),
                    ProviderError::Unavailable(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_UNAVAILABLE"),
                    ProviderError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
                };
                (status, code, err.to_string())
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(otoge_common::Error::Database(err)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                err.to_string(),
            ),
            ApiError::Common(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, message = %message, "Request failed");
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
pub type ApiResult<T> = Result<T, ApiError>;
