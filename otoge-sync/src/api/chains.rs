//! Update chain endpoint
//!
//! POST /maimai/chains/update runs one synchronization for a player: fetch
//! from the named sources, merge into the local store, push to the named
//! targets. The response is the run summary whenever the merge committed,
//! even if some providers failed.

use axum::{extract::State, routing::post, Json, Router};
use otoge_common::PlayerIdentity;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::ApiResult;
use crate::providers::SyncIdentity;
use crate::services::{ChainRequest, ChainSummary, SourceMode};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateChainRequest {
    /// Local player credential (uuid)
    pub identity: String,
    /// Upstream credentials keyed by provider name
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    pub sources: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub source_mode: SourceMode,
    #[serde(default)]
    pub song_id: Option<u32>,
}

/// POST /maimai/chains/update
pub async fn update_chain(
    State(state): State<AppState>,
    Json(body): Json<UpdateChainRequest>,
) -> ApiResult<Json<ChainSummary>> {
    let player = PlayerIdentity::parse(&body.identity)?;
    let sources = state.providers.resolve(&body.sources)?;
    let targets = state.providers.resolve(&body.targets)?;

    let request = ChainRequest {
        identity: SyncIdentity {
            player,
            credentials: body.credentials,
        },
        sources,
        targets,
        source_mode: body.source_mode,
        song_id: body.song_id,
    };

    let cancel = state.shutdown.child_token();
    let summary = state.chain.run(request, state.lock_wait, &cancel).await?;
    Ok(Json(summary))
}

pub fn chain_routes() -> Router<AppState> {
    Router::new().route("/maimai/chains/update", post(update_chain))
}
