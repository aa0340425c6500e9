//! Postgres-backed implementations of the trait seams the core crates
//! expose (`MinerDirectory`, `BlacklistStore`, `ReceiptStore`,
//! `ValidatorKeyResolver`, `MinerRegistry`, `SystemEventSink`,
//! `DynamicConfig`), plus the miner/manifest/metagraph bookkeeping that
//! feeds the in-memory `AllowanceLedger` (SPEC_FULL.md §6-add).

pub mod advisory_lock;
pub mod blacklist;
pub mod cycle;
pub mod directory;
pub mod dynamic_config;
pub mod miners;
pub mod receipts;
pub mod system_events;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn connect(database_url: &str) -> sqlx::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
