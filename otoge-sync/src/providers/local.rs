//! Self-hosted provider backed by the score store
//!
//! Runs inside a chain that already holds the player's identity lock, so it
//! talks to the store directly and never takes the lock itself.

use async_trait::async_trait;
use otoge_common::{PlayerIdentity, ScoreRecord};

use super::{PlayerIdentifier, ProviderError, ScoreSink, ScoreSource, USAGICARD};
use crate::db::{ScoreStore, StoreError};

pub struct LocalStoreProvider {
    store: ScoreStore,
}

impl LocalStoreProvider {
    pub fn new(store: ScoreStore) -> Self {
        Self { store }
    }
}

fn player(identifier: &PlayerIdentifier) -> Result<&PlayerIdentity, ProviderError> {
    match identifier {
        PlayerIdentifier::Player(identity) => Ok(identity),
        other => Err(ProviderError::Unauthorized(format!(
            "{} needs a player uuid, got {:?}",
            USAGICARD, other
        ))),
    }
}

fn unavailable(e: StoreError) -> ProviderError {
    ProviderError::Unavailable(format!("{}: {}", USAGICARD, e))
}

#[async_trait]
impl ScoreSource for LocalStoreProvider {
    async fn fetch_all(&self, identifier: &PlayerIdentifier) -> Result<Vec<ScoreRecord>, ProviderError> {
        self.store.read_all(player(identifier)?).await.map_err(unavailable)
    }

    async fn fetch_one(
        &self,
        identifier: &PlayerIdentifier,
        song_id: u32,
    ) -> Result<Vec<ScoreRecord>, ProviderError> {
        self.store
            .read_one(player(identifier)?, song_id)
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl ScoreSink for LocalStoreProvider {
    async fn push(&self, identifier: &PlayerIdentifier, records: &[ScoreRecord]) -> Result<(), ProviderError> {
        let summary = self
            .store
            .upsert_merge(player(identifier)?, records)
            .await
            .map_err(unavailable)?;
        tracing::debug!(
            provider = USAGICARD,
            applied = summary.applied,
            unchanged = summary.unchanged,
            "Local store push merged"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use otoge_common::{ChartType, LevelIndex, RateType};

    #[tokio::test]
    async fn test_push_then_fetch() {
        let provider = LocalStoreProvider::new(ScoreStore::new(init_memory_pool().await.unwrap()));
        let id = PlayerIdentifier::Player(
            PlayerIdentity::parse("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap(),
        );
        let records = vec![
            ScoreRecord::new(834, ChartType::Standard, LevelIndex::Master, RateType::S),
            ScoreRecord::new(10834, ChartType::Dx, LevelIndex::Expert, RateType::A),
        ];

        provider.push(&id, &records).await.unwrap();

        assert_eq!(provider.fetch_all(&id).await.unwrap().len(), 2);
        assert_eq!(provider.fetch_one(&id, 834).await.unwrap().len(), 2);
        assert!(provider.fetch_one(&id, 835).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_identifier_is_unauthorized() {
        let provider = LocalStoreProvider::new(ScoreStore::new(init_memory_pool().await.unwrap()));
        let result = provider.fetch_all(&PlayerIdentifier::FriendCode(42)).await;
        assert!(matches!(result, Err(ProviderError::Unauthorized(_))));
    }
}
