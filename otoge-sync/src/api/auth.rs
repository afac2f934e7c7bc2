//! Developer-token gate
//!
//! When `[developer] enable_check` is on, requests must carry an
//! `x-developer-token` header naming an enabled developer. The set of enabled
//! tokens is cached in memory; it is loaded at startup and refreshed by
//! `GET /developers`.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

pub const DEVELOPER_TOKEN_HEADER: &str = "x-developer-token";

/// Authorization middleware for the score routes
pub async fn developer_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.developer.enable_check {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(DEVELOPER_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", DEVELOPER_TOKEN_HEADER)))?;

    if !state.developer_tokens.read().await.contains(token) {
        warn!(path = %request.uri().path(), "Rejected unknown developer token");
        return Err(ApiError::Unauthorized("developer token is not enabled".to_string()));
    }

    Ok(next.run(request).await)
}
