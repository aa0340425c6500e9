//! Cross-process advisory lock: ensures at most one process backfills
//! blocks at a time (spec.md §4.3, "`ALLOWANCE_FETCHING`"). No critical
//! section spans a suspension except holding this lock for a bounded work
//! unit (spec.md §5, `T = 5s`).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

pub const ALLOWANCE_FETCHING_LOCK: &str = "ALLOWANCE_FETCHING";
pub const ALLOWANCE_FETCHING_LOCK_TTL: Duration = Duration::from_secs(5);

/// A held lock releases on drop. Implementations must make the release
/// visible to other processes promptly (an advisory Postgres lock, a sled
/// lease row, ...).
pub trait LockGuard: Send {}

#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// `None` if another holder currently has the lock (spec.md §4.3:
    /// "contenders observe `Locked` and no-op").
    async fn try_acquire(&self, name: &str) -> Option<Box<dyn LockGuard>>;
}

struct InMemoryGuard {
    #[allow(dead_code)]
    permit: tokio::sync::OwnedMutexGuard<()>,
}

impl LockGuard for InMemoryGuard {}

/// Single-process stand-in used by tests and single-node deployments: a
/// `tokio::sync::Mutex` keyed by lock name.
#[derive(Default)]
pub struct InMemoryAdvisoryLock {
    locks: dashmap::DashMap<String, std::sync::Arc<Mutex<()>>>,
}

impl InMemoryAdvisoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> std::sync::Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl AdvisoryLock for InMemoryAdvisoryLock {
    async fn try_acquire(&self, name: &str) -> Option<Box<dyn LockGuard>> {
        let mutex = self.lock_for(name);
        match mutex.try_lock_owned() {
            Ok(permit) => Some(Box::new(InMemoryGuard { permit })),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_is_locked_out_while_first_holds() {
        let lock = InMemoryAdvisoryLock::new();
        let guard1 = lock.try_acquire(ALLOWANCE_FETCHING_LOCK).await;
        assert!(guard1.is_some());

        let guard2 = lock.try_acquire(ALLOWANCE_FETCHING_LOCK).await;
        assert!(guard2.is_none());
    }

    #[tokio::test]
    async fn lock_is_acquirable_again_after_release() {
        let lock = InMemoryAdvisoryLock::new();
        {
            let _guard = lock.try_acquire(ALLOWANCE_FETCHING_LOCK).await.unwrap();
        }
        let guard2 = lock.try_acquire(ALLOWANCE_FETCHING_LOCK).await;
        assert!(guard2.is_some());
    }
}
