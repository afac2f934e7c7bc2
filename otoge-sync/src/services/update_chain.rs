//! Update chain orchestrator
//!
//! One run, under the player's identity lock:
//! 1. Fetch from the source providers (fallback or parallel)
//! 2. Drop malformed records per source, merge the rest into the score store in one transaction
//! 3. Read the merged set back and push it to every target in parallel
//!
//! Provider failures are recorded per provider and never abort the run.
//! Store failures abort it. Cancellation before the merge aborts with nothing
//! written; cancellation after the commit only stops unfinished pushes.

use futures::future::join_all;
use otoge_common::{IdentityError, ScoreRecord};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{MergeSummary, ScoreStore, StoreError};
use crate::locks::{IdentityGuard, IdentityLocks};
use crate::providers::{ProviderBinding, ProviderError, SyncIdentity};

/// How source providers are queried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// In order, stopping at the first source that returns records
    #[default]
    Fallback,
    /// All at once, combining every successful result
    Parallel,
}

/// Run-level failures
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    /// Another run holds the identity lock past the wait bound (retryable)
    #[error("identity is busy with another update")]
    Busy,

    #[error("update cancelled before merge")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened with one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// Fetched or pushed `records` records
    Succeeded { records: usize },
    /// Source answered with no records
    Empty,
    Failed { kind: String, message: String },
    /// Not queried because an earlier fallback source had data
    Skipped,
    Cancelled,
}

impl ProviderOutcome {
    fn failed(e: &ProviderError) -> Self {
        match e {
            ProviderError::Cancelled => ProviderOutcome::Cancelled,
            other => ProviderOutcome::Failed {
                kind: other.kind().to_string(),
                message: other.to_string(),
            },
        }
    }

    fn is_problem(&self) -> bool {
        matches!(self, ProviderOutcome::Failed { .. } | ProviderOutcome::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderReport {
    pub provider: String,
    #[serde(flatten)]
    pub outcome: ProviderOutcome,
}

/// `Complete` when every provider call went through; the merge committed either way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Partial,
}

/// Result of a run whose merge committed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainSummary {
    pub status: RunStatus,
    pub sources: Vec<ProviderReport>,
    pub targets: Vec<ProviderReport>,
    /// Records returned by the sources
    pub fetched: usize,
    /// Fetched records dropped as malformed
    pub rejected: usize,
    pub merge: MergeSummary,
    pub elapsed_ms: u64,
}

/// One synchronization request
#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub identity: SyncIdentity,
    pub sources: Vec<ProviderBinding>,
    pub targets: Vec<ProviderBinding>,
    pub source_mode: SourceMode,
    /// Restrict fetching to one song (all charts and difficulties)
    pub song_id: Option<u32>,
}

/// Orchestrates update runs against one score store
#[derive(Clone)]
pub struct UpdateChain {
    store: ScoreStore,
    locks: IdentityLocks,
}

impl UpdateChain {
    pub fn new(store: ScoreStore, locks: IdentityLocks) -> Self {
        Self { store, locks }
    }

    /// Execute one run.
    ///
    /// `lock_wait` bounds how long to wait for a busy identity (`None` waits
    /// indefinitely).
    pub async fn run(
        &self,
        request: ChainRequest,
        lock_wait: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ChainSummary, ChainError> {
        let started = Instant::now();
        let identity = &request.identity;

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChainError::Cancelled),
            guard = self.acquire(identity, lock_wait) => guard?,
        };

        info!(
            identity = %identity.player,
            sources = request.sources.len(),
            targets = request.targets.len(),
            mode = ?request.source_mode,
            "Update run started"
        );

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(identity = %identity.player, "Update run cancelled during fetch");
                return Err(ChainError::Cancelled);
            }
            resolved = resolve_sources(&request) => resolved,
        };
        let Resolved {
            reports: sources,
            records: valid,
            fetched: fetched_count,
            rejected,
        } = resolved;

        // Not raced against cancellation: once started, the merge commits or fails on its own
        let merge = self
            .store
            .upsert_merge(&identity.player, &valid)
            .await
            .map_err(|e| {
                error!(identity = %identity.player, error = %e, "Merge failed, aborting run");
                e
            })?;

        let targets = if request.targets.is_empty() {
            Vec::new()
        } else {
            let merged = self.store.read_all(&identity.player).await?;
            dispatch_targets(&request, &merged, cancel).await
        };

        let status = if sources.iter().chain(&targets).any(|r| r.outcome.is_problem()) {
            RunStatus::Partial
        } else {
            RunStatus::Complete
        };
        let summary = ChainSummary {
            status,
            sources,
            targets,
            fetched: fetched_count,
            rejected,
            merge,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            identity = %identity.player,
            status = ?summary.status,
            applied = summary.merge.applied,
            unchanged = summary.merge.unchanged,
            rejected = summary.rejected,
            elapsed_ms = summary.elapsed_ms,
            "Update run finished"
        );
        Ok(summary)
    }

    async fn acquire(
        &self,
        identity: &SyncIdentity,
        lock_wait: Option<Duration>,
    ) -> Result<IdentityGuard, ChainError> {
        match lock_wait {
            None => Ok(self.locks.acquire(&identity.player).await),
            Some(wait) => self
                .locks
                .acquire_within(&identity.player, wait)
                .await
                .ok_or_else(|| {
                    warn!(identity = %identity.player, wait_ms = wait.as_millis() as u64, "Identity busy");
                    ChainError::Busy
                }),
        }
    }
}

async fn fetch_from(
    binding: &ProviderBinding,
    identity: &SyncIdentity,
    song_id: Option<u32>,
) -> Result<Vec<ScoreRecord>, ProviderError> {
    let source = binding.instantiate().source.ok_or_else(|| {
        ProviderError::NotSupported(format!("{} cannot be used as a source", binding.name()))
    })?;
    let player = binding.map_identity(identity)?;
    match song_id {
        Some(song_id) => source.fetch_one(&player, song_id).await,
        None => source.fetch_all(&player).await,
    }
}

/// Validated records of one or more sources
#[derive(Default)]
struct Resolved {
    reports: Vec<ProviderReport>,
    /// Records that passed validation
    records: Vec<ScoreRecord>,
    fetched: usize,
    rejected: usize,
}

impl Resolved {
    fn absorb(&mut self, other: Resolved) {
        self.reports.extend(other.reports);
        self.records.extend(other.records);
        self.fetched += other.fetched;
        self.rejected += other.rejected;
    }
}

/// A source whose every record is rejected counts as empty
fn fetch_outcome(binding: &ProviderBinding, result: Result<Vec<ScoreRecord>, ProviderError>) -> Resolved {
    let (outcome, fetched, records, rejected) = match result {
        Ok(records) => {
            let fetched = records.len();
            let (valid, rejected) = validate(binding, records);
            let outcome = if valid.is_empty() {
                ProviderOutcome::Empty
            } else {
                ProviderOutcome::Succeeded { records: valid.len() }
            };
            (outcome, fetched, valid, rejected)
        }
        Err(e) => {
            warn!(provider = binding.name(), error = %e, "Source failed");
            (ProviderOutcome::failed(&e), 0, Vec::new(), 0)
        }
    };
    debug!(provider = binding.name(), outcome = ?outcome, rejected, "Source resolved");
    Resolved {
        reports: vec![ProviderReport {
            provider: binding.name().to_string(),
            outcome,
        }],
        records,
        fetched,
        rejected,
    }
}

async fn resolve_sources(request: &ChainRequest) -> Resolved {
    let mut resolved = Resolved::default();

    match request.source_mode {
        SourceMode::Fallback => {
            for binding in &request.sources {
                if !resolved.records.is_empty() {
                    resolved.reports.push(ProviderReport {
                        provider: binding.name().to_string(),
                        outcome: ProviderOutcome::Skipped,
                    });
                    continue;
                }
                let result = fetch_from(binding, &request.identity, request.song_id).await;
                resolved.absorb(fetch_outcome(binding, result));
            }
        }
        SourceMode::Parallel => {
            let fetches = request.sources.iter().map(|binding| async move {
                let result = fetch_from(binding, &request.identity, request.song_id).await;
                fetch_outcome(binding, result)
            });
            for source in join_all(fetches).await {
                resolved.absorb(source);
            }
        }
    }

    resolved
}

/// Split off records that would fail the merge contract
fn validate(binding: &ProviderBinding, records: Vec<ScoreRecord>) -> (Vec<ScoreRecord>, usize) {
    let mut rejected = 0;
    let valid = records
        .into_iter()
        .filter(|record| match record.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(provider = binding.name(), error = %e, "Rejecting fetched score");
                rejected += 1;
                false
            }
        })
        .collect();
    (valid, rejected)
}

async fn push_to(
    binding: &ProviderBinding,
    identity: &SyncIdentity,
    records: &[ScoreRecord],
) -> Result<(), ProviderError> {
    let sink = binding.instantiate().sink.ok_or_else(|| {
        ProviderError::NotSupported(format!("{} cannot be used as a target", binding.name()))
    })?;
    let player = binding.map_identity(identity)?;
    sink.push(&player, records).await
}

async fn dispatch_targets(
    request: &ChainRequest,
    records: &[ScoreRecord],
    cancel: &CancellationToken,
) -> Vec<ProviderReport> {
    let pushes = request.targets.iter().map(|binding| async move {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            pushed = push_to(binding, &request.identity, records) => pushed,
        };
        let outcome = match result {
            Ok(()) => ProviderOutcome::Succeeded {
                records: records.len(),
            },
            Err(e) => {
                warn!(provider = binding.name(), error = %e, "Target push failed");
                ProviderOutcome::failed(&e)
            }
        };
        ProviderReport {
            provider: binding.name().to_string(),
            outcome,
        }
    });
    join_all(pushes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{map_local, ProviderInstance};
    use otoge_common::{Achievement, ChartType, LevelIndex, RateType};

    fn binding() -> ProviderBinding {
        ProviderBinding::new("lxns", ProviderInstance::default, map_local)
    }

    fn record(song_id: u32, percent: f64) -> ScoreRecord {
        ScoreRecord {
            achievements: Achievement::from_percent(percent).unwrap(),
            ..ScoreRecord::new(song_id, ChartType::Standard, LevelIndex::Master, RateType::A)
        }
    }

    #[test]
    fn test_validate_counts_rejections() {
        let mut bad = record(2, 50.0);
        bad.dx_rating = Some(f64::NAN);
        let (valid, rejected) = validate(&binding(), vec![record(1, 99.0), bad, record(0, 80.0)]);
        assert_eq!(valid.len(), 1);
        assert_eq!(rejected, 2);
    }

    #[test]
    fn test_fully_rejected_source_is_empty() {
        let resolved = fetch_outcome(&binding(), Ok(vec![record(0, 99.0), record(0, 98.0)]));
        assert_eq!(resolved.reports[0].outcome, ProviderOutcome::Empty);
        assert!(resolved.records.is_empty());
        assert_eq!((resolved.fetched, resolved.rejected), (2, 2));

        let resolved = fetch_outcome(&binding(), Ok(vec![record(0, 99.0), record(5, 98.0)]));
        assert_eq!(resolved.reports[0].outcome, ProviderOutcome::Succeeded { records: 1 });
    }

    #[test]
    fn test_outcome_serialization() {
        let report = ProviderReport {
            provider: "lxns".to_string(),
            outcome: ProviderOutcome::Failed {
                kind: "unauthorized".to_string(),
                message: "unauthorized: bad token".to_string(),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["provider"], "lxns");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["kind"], "unauthorized");

        let skipped = serde_json::to_value(ProviderReport {
            provider: "wechat".to_string(),
            outcome: ProviderOutcome::Skipped,
        })
        .unwrap();
        assert_eq!(skipped["outcome"], "skipped");
    }

    #[test]
    fn test_source_mode_parses_lowercase() {
        let mode: SourceMode = serde_json::from_str("\"parallel\"").unwrap();
        assert_eq!(mode, SourceMode::Parallel);
        assert_eq!(SourceMode::default(), SourceMode::Fallback);
    }
}
