//! Developer token applications

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::db::developers::{self, Developer};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ApplyQuery {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub developer_token: String,
}

/// POST /developers?name=&description=
///
/// New developers start disabled; the returned token works once enabled.
pub async fn apply(
    State(state): State<AppState>,
    Query(query): Query<ApplyQuery>,
) -> ApiResult<Json<Developer>> {
    if !state.developer.enable_apply {
        return Err(ApiError::Forbidden(
            "developer applications are closed".to_string(),
        ));
    }
    let name = query.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let developer = developers::apply(&state.db, name, query.description.as_deref()).await?;
    Ok(Json(developer))
}

/// GET /developers?developer_token=
pub async fn lookup(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<Json<Developer>> {
    let developer = developers::find_by_token(&state.db, &query.developer_token)
        .await?
        .ok_or_else(|| ApiError::NotFound("developer".to_string()))?;

    // Pick up approvals made since startup
    state.refresh_developer_tokens().await?;

    Ok(Json(developer))
}

pub fn developer_routes() -> Router<AppState> {
    Router::new().route("/developers", get(lookup).post(apply))
}
