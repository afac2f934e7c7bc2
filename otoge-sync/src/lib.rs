//! otoge-sync library interface
//!
//! Score synchronization service: merges a player's scores from several
//! upstream providers into one local score set and publishes it back out.
//! Exposes public APIs for integration testing.

pub mod api;
pub mod db;
pub mod error;
pub mod locks;
pub mod providers;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use otoge_common::config::{DeveloperConfig, TomlConfig};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::db::ScoreStore;
use crate::locks::IdentityLocks;
use crate::providers::ProviderRegistry;
use crate::services::UpdateChain;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub store: ScoreStore,
    /// Shared with `chain` so direct uploads and chain runs exclude each other
    pub locks: IdentityLocks,
    pub chain: UpdateChain,
    pub providers: Arc<ProviderRegistry>,
    /// Tokens of enabled developers
    pub developer_tokens: Arc<RwLock<HashSet<String>>>,
    pub developer: DeveloperConfig,
    /// Bound on waiting for a busy identity (`None` = wait indefinitely)
    pub lock_wait: Option<Duration>,
    /// Cancelled on shutdown; runs use child tokens
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, providers: ProviderRegistry, config: &TomlConfig) -> Self {
        let store = ScoreStore::new(db.clone());
        let locks = IdentityLocks::new();
        Self {
            chain: UpdateChain::new(store.clone(), locks.clone()),
            db,
            store,
            locks,
            providers: Arc::new(providers),
            developer_tokens: Arc::new(RwLock::new(HashSet::new())),
            developer: config.developer.clone(),
            lock_wait: otoge_common::time::wait_bound(config.lock_wait_ms),
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
        }
    }

    /// Reload the enabled developer tokens from the database
    pub async fn refresh_developer_tokens(&self) -> otoge_common::Result<usize> {
        let tokens = db::developers::load_enabled_tokens(&self.db).await?;
        let count = tokens.len();
        *self.developer_tokens.write().await = tokens;
        Ok(count)
    }
}

/// Build application router
///
/// `/maimai/*` routes sit behind the developer-token gate; `/health` and
/// `/developers` do not.
pub fn build_router(state: AppState) -> Router {
    let maimai = Router::new()
        .merge(api::chain_routes())
        .merge(api::score_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::developer_gate,
        ));

    Router::new()
        .merge(api::health_routes())
        .merge(api::developer_routes())
        .merge(maimai)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
