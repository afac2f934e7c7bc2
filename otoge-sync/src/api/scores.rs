//! Score endpoints
//!
//! `/maimai/usagicard/scores` reads and writes the local score store.
//! `/maimai/{provider}/scores` reads straight from a registered upstream,
//! identified by the caller's credential for that provider.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use otoge_common::{PlayerIdentity, ScoreRecord};
use serde::Deserialize;

use crate::db::MergeSummary;
use crate::error::{ApiError, ApiResult};
use crate::providers::{ProviderBinding, ProviderError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PlayerQuery {
    pub uuid: String,
}

/// GET /maimai/usagicard/scores?uuid=
pub async fn list_scores(
    State(state): State<AppState>,
    Query(query): Query<PlayerQuery>,
) -> ApiResult<Json<Vec<ScoreRecord>>> {
    let player = PlayerIdentity::parse(&query.uuid)?;
    Ok(Json(state.store.read_all(&player).await?))
}

/// GET /maimai/usagicard/scores/:song_id?uuid=
pub async fn song_scores(
    State(state): State<AppState>,
    Path(song_id): Path<u32>,
    Query(query): Query<PlayerQuery>,
) -> ApiResult<Json<Vec<ScoreRecord>>> {
    let player = PlayerIdentity::parse(&query.uuid)?;
    Ok(Json(state.store.read_one(&player, song_id).await?))
}

/// POST /maimai/usagicard/scores?uuid=
///
/// Merges the posted batch under the player's lock, all or nothing.
pub async fn upload_scores(
    State(state): State<AppState>,
    Query(query): Query<PlayerQuery>,
    Json(records): Json<Vec<ScoreRecord>>,
) -> ApiResult<Json<MergeSummary>> {
    let player = PlayerIdentity::parse(&query.uuid)?;

    let _guard = match state.lock_wait {
        Some(wait) => state
            .locks
            .acquire_within(&player, wait)
            .await
            .ok_or_else(|| ApiError::Conflict("identity is busy with another update".to_string()))?,
        None => state.locks.acquire(&player).await,
    };

    let summary = state.store.upsert_merge(&player, &records).await?;
    tracing::info!(
        identity = %player,
        applied = summary.applied,
        unchanged = summary.unchanged,
        "Uploaded scores merged"
    );
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct CredentialQuery {
    #[serde(default)]
    pub credential: String,
}

fn readable_binding(state: &AppState, provider: &str) -> ApiResult<ProviderBinding> {
    state
        .providers
        .get(provider)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("provider {}", provider)))
}

async fn fetch_from_provider(
    binding: &ProviderBinding,
    credential: &str,
    song_id: Option<u32>,
) -> ApiResult<Vec<ScoreRecord>> {
    let player = binding.identify(credential)?;
    let source = binding.instantiate().source.ok_or_else(|| {
        ProviderError::NotSupported(format!("{} cannot be used as a source", binding.name()))
    })?;
    let records = match song_id {
        Some(song_id) => source.fetch_one(&player, song_id).await,
        None => source.fetch_all(&player).await,
    }
    .map_err(|e| {
        tracing::warn!(provider = binding.name(), error = %e, "Provider read failed");
        e
    })?;
    Ok(records)
}

/// GET /maimai/:provider/scores?credential=
pub async fn provider_scores(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CredentialQuery>,
) -> ApiResult<Json<Vec<ScoreRecord>>> {
    let binding = readable_binding(&state, &provider)?;
    Ok(Json(fetch_from_provider(&binding, &query.credential, None).await?))
}

/// GET /maimai/:provider/scores/:song_id?credential=
pub async fn provider_song_scores(
    State(state): State<AppState>,
    Path((provider, song_id)): Path<(String, u32)>,
    Query(query): Query<CredentialQuery>,
) -> ApiResult<Json<Vec<ScoreRecord>>> {
    let binding = readable_binding(&state, &provider)?;
    Ok(Json(
        fetch_from_provider(&binding, &query.credential, Some(song_id)).await?,
    ))
}

pub fn score_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/maimai/usagicard/scores",
            get(list_scores).post(upload_scores),
        )
        .route("/maimai/usagicard/scores/:song_id", get(song_scores))
        .route("/maimai/:provider/scores", get(provider_scores))
        .route("/maimai/:provider/scores/:song_id", get(provider_song_scores))
}
