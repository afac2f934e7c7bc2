//! Per-identity lock registry
//!
//! One async mutex per player credential, created on first use. An entry is
//! removed as soon as nobody holds or awaits it, so the registry only grows
//! with the number of identities that are busy right now.

use dashmap::DashMap;
use otoge_common::PlayerIdentity;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Registry of identity locks, cheap to clone
#[derive(Clone, Default)]
pub struct IdentityLocks {
    locks: Arc<LockMap>,
}

/// Held lock for one identity; released on drop
pub struct IdentityGuard {
    // Field order matters: the mutex guard must drop before the slot
    _guard: OwnedMutexGuard<()>,
    _slot: Slot,
}

/// Evicts the registry entry once the last handle is gone
struct Slot {
    key: String,
    locks: Arc<LockMap>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the identity's lock is free and take it
    pub async fn acquire(&self, identity: &PlayerIdentity) -> IdentityGuard {
        let key = identity.as_str().to_string();
        let slot = Slot {
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        };
        let lock = Arc::clone(
            self.locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let guard = lock.lock_owned().await;
        IdentityGuard {
            _guard: guard,
            _slot: slot,
        }
    }

    /// Like `acquire`, giving up after `wait`. `None` means the identity is busy.
    pub async fn acquire_within(
        &self,
        identity: &PlayerIdentity,
        wait: Duration,
    ) -> Option<IdentityGuard> {
        tokio::time::timeout(wait, self.acquire(identity)).await.ok()
    }

    /// Run `f` while holding the identity's lock
    pub async fn with_lock<F, Fut, T>(&self, identity: &PlayerIdentity, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(identity).await;
        f().await
    }

    /// Number of identities currently held or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn identity(n: u8) -> PlayerIdentity {
        PlayerIdentity::parse(&format!("{:08x}-0000-4000-8000-000000000000", n)).unwrap()
    }

    #[tokio::test]
    async fn test_same_identity_is_serialized() {
        let locks = IdentityLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            tasks.spawn(async move {
                locks
                    .with_lock(&identity(1), || async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_identities_do_not_block() {
        let locks = IdentityLocks::new();
        let _first = locks.acquire(&identity(1)).await;

        let second = locks
            .acquire_within(&identity(2), Duration::from_millis(50))
            .await;
        assert!(second.is_some());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_acquire_within_reports_busy() {
        let locks = IdentityLocks::new();
        let held = locks.acquire(&identity(3)).await;

        let busy = locks
            .acquire_within(&identity(3), Duration::from_millis(20))
            .await;
        assert!(busy.is_none());

        drop(held);
        assert!(locks.is_empty(), "timed-out waiter leaves no entry behind");
        assert!(locks
            .acquire_within(&identity(3), Duration::from_millis(20))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_entry_kept_while_waiter_queued() {
        let locks = IdentityLocks::new();
        let held = locks.acquire(&identity(4)).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&identity(4)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(held);
        assert_eq!(locks.len(), 1, "queued waiter still owns the entry");

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_released_when_body_panics() {
        let locks = IdentityLocks::new();
        let task = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .with_lock(&identity(5), || async { panic!("body failed") })
                    .await
            })
        };
        assert!(task.await.is_err());

        assert!(locks
            .acquire_within(&identity(5), Duration::from_millis(20))
            .await
            .is_some());
    }
}
