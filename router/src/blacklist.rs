//! Miner blacklist (spec.md §4.4). Honors expiration: a blacklist entry
//! whose `expires_at` has passed no longer excludes the miner.

use std::time::Duration;

use async_trait::async_trait;
use compute_validator_common::ids::Hotkey;
use compute_validator_common::time::{get_current_time_in_seconds, TimestampSeconds};
use dashmap::DashMap;

#[derive(Clone, Debug)]
pub struct BlacklistEntry {
    pub reason: String,
    pub expires_at: TimestampSeconds,
}

#[async_trait]
pub trait BlacklistStore: Send + Sync {
    async fn is_blacklisted(&self, miner: &Hotkey) -> bool;
    async fn blacklist(&self, miner: &Hotkey, reason: String, ttl: Duration);
}

/// In-process blacklist. The `validator` binary backs the same interface
/// with a `miner_blacklist` Postgres table (SPEC_FULL.md §6-add).
#[derive(Default)]
pub struct InMemoryBlacklist {
    entries: DashMap<Hotkey, BlacklistEntry>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlacklistStore for InMemoryBlacklist {
    async fn is_blacklisted(&self, miner: &Hotkey) -> bool {
        match self.entries.get(miner) {
            Some(entry) => get_current_time_in_seconds() < entry.expires_at,
            None => false,
        }
    }

    async fn blacklist(&self, miner: &Hotkey, reason: String, ttl: Duration) {
        let expires_at = get_current_time_in_seconds() + ttl.as_secs();
        self.entries.insert(
            miner.clone(),
            BlacklistEntry { reason, expires_at },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn freshly_blacklisted_miner_is_blacklisted() {
        let store = InMemoryBlacklist::new();
        let miner: Hotkey = "m1".into();
        store
            .blacklist(&miner, "busy without excuse".to_string(), Duration::from_secs(60))
            .await;
        assert!(store.is_blacklisted(&miner).await);
    }

    #[tokio::test]
    async fn expired_blacklist_entry_is_ignored() {
        let store = InMemoryBlacklist::new();
        let miner: Hotkey = "m1".into();
        store.entries.insert(
            miner.clone(),
            BlacklistEntry {
                reason: "expired entry".into(),
                expires_at: get_current_time_in_seconds().saturating_sub(900),
            },
        );
        assert!(!store.is_blacklisted(&miner).await);
    }
}
