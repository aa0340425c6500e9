//! `router::BlacklistStore` backed by the `miner_blacklist` table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use compute_validator_common::ids::Hotkey;
use sqlx::PgPool;

use router::BlacklistStore;

pub struct PostgresBlacklist {
    pool: PgPool,
}

impl PostgresBlacklist {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlacklistStore for PostgresBlacklist {
    async fn is_blacklisted(&self, miner: &Hotkey) -> bool {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT expires_at > now() FROM miner_blacklist WHERE miner_hotkey = $1",
        )
        .bind(miner.as_str())
        .fetch_optional(&self.pool)
        .await
        .unwrap_or(None);
        row.map(|(still_active,)| still_active).unwrap_or(false)
    }

    async fn blacklist(&self, miner: &Hotkey, reason: String, ttl: Duration) {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let _ = sqlx::query(
            "INSERT INTO miner_blacklist (miner_hotkey, reason, created_at, expires_at) VALUES ($1, $2, now(), $3) \
             ON CONFLICT (miner_hotkey) DO UPDATE SET reason = EXCLUDED.reason, created_at = now(), expires_at = EXCLUDED.expires_at",
        )
        .bind(miner.as_str())
        .bind(reason)
        .bind(expires_at)
        .execute(&self.pool)
        .await;
    }
}
