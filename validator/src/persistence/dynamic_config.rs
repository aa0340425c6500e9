//! `DynamicConfig` backed by the `dynamic_config` table: the whole
//! `DynamicOptions` struct is stored as one JSON row keyed `"global"`, so
//! operators edit one document instead of reconciling N independent keys
//! (spec.md §6's "recognized dynamic options" are fields of that document).

use async_trait::async_trait;
use compute_validator_common::config::{DynamicConfig, DynamicOptions};
use log::warn;
use sqlx::PgPool;

const GLOBAL_KEY: &str = "global";

pub struct PostgresDynamicConfig {
    pool: PgPool,
}

impl PostgresDynamicConfig {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Seeds the row with defaults if it doesn't exist yet; a fresh
    /// deployment should never have to hand-insert a JSON blob before its
    /// first `current()` poll succeeds.
    pub async fn ensure_seeded(&self) -> sqlx::Result<()> {
        let value = serde_json::to_value(DynamicOptions::default()).expect("DynamicOptions always serializes");
        sqlx::query(
            "INSERT INTO dynamic_config (key, value, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(GLOBAL_KEY)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DynamicConfig for PostgresDynamicConfig {
    async fn current(&self) -> DynamicOptions {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT value FROM dynamic_config WHERE key = $1")
                .bind(GLOBAL_KEY)
                .fetch_optional(&self.pool)
                .await
                .unwrap_or(None);

        match row.and_then(|(value,)| serde_json::from_value(value).ok()) {
            Some(options) => options,
            None => {
                warn!("dynamic_config row missing or unparseable, falling back to defaults");
                DynamicOptions::default()
            }
        }
    }
}
