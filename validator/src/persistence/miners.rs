//! The `miner` table: upstream-of-everything identity facts (hotkey,
//! coldkey, axon, stake), refreshed from each metagraph snapshot, plus the
//! resolver `receipt_transfer` needs to verify a miner's signed receipts
//! and the registry it needs to know who to sweep.

use async_trait::async_trait;
use allowance::Manifest;
use compute_validator_common::ids::Hotkey;
use compute_validator_common::signing::PublicKey;
use sqlx::PgPool;

use receipt_transfer::keys::ValidatorKeyResolver;
use receipt_transfer::registry::MinerRegistry;
use router::excuse::ValidatorStakeLookup;

/// Reads straight from the `miner` table: a validator's public key is
/// derived from its hotkey the same way a miner's would be, since both are
/// entries in the same neuron set (spec.md §4.1).
pub struct PostgresValidatorKeyResolver {
    pool: PgPool,
}

impl PostgresValidatorKeyResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ValidatorKeyResolver for PostgresValidatorKeyResolver {
    async fn public_key_for(&self, validator: &Hotkey) -> Option<PublicKey> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT public_key_hex FROM miner WHERE hotkey = $1")
                .bind(validator.as_str())
                .fetch_optional(&self.pool)
                .await
                .ok()?;
        let public_key_hex = row?.0?;
        PublicKey::from_hex(&public_key_hex).ok()
    }
}

pub struct PostgresMinerRegistry {
    pool: PgPool,
}

impl PostgresMinerRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MinerRegistry for PostgresMinerRegistry {
    async fn all_miners(&self) -> Vec<Hotkey> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT hotkey FROM miner WHERE NOT is_validator")
            .fetch_all(&self.pool)
            .await
            .unwrap_or_default();
        rows.into_iter().map(|(hotkey,)| hotkey.into()).collect()
    }
}

/// Reads the same `miner` table's `stake` column, for the excuse policy
/// (spec.md §4.4): `excuses_justify_busy_decline` needs the stake of every
/// validator that signed a miner's excuse receipts.
pub struct PostgresValidatorStakeLookup {
    pool: PgPool,
}

impl PostgresValidatorStakeLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ValidatorStakeLookup for PostgresValidatorStakeLookup {
    async fn stake_of(&self, validator: &Hotkey) -> Option<f64> {
        let row: Option<(f64,)> = sqlx::query_as("SELECT stake FROM miner WHERE hotkey = $1")
            .bind(validator.as_str())
            .fetch_optional(&self.pool)
            .await
            .ok()?;
        row.map(|(stake,)| stake)
    }
}

/// Upserts a neuron's identity/stake facts, called once per metagraph
/// snapshot refresh.
pub async fn upsert_miner(
    pool: &PgPool,
    hotkey: &Hotkey,
    coldkey: &str,
    axon_ip: Option<&str>,
    axon_port: Option<i32>,
    is_validator: bool,
    stake: f64,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO miner (hotkey, coldkey, axon_ip, axon_port, is_validator, stake, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, now()) \
         ON CONFLICT (hotkey) DO UPDATE SET \
           coldkey = EXCLUDED.coldkey, axon_ip = EXCLUDED.axon_ip, axon_port = EXCLUDED.axon_port, \
           is_validator = EXCLUDED.is_validator, stake = EXCLUDED.stake, updated_at = now()",
    )
    .bind(hotkey.as_str())
    .bind(coldkey)
    .bind(axon_ip)
    .bind(axon_port)
    .bind(is_validator)
    .bind(stake)
    .execute(pool)
    .await?;
    Ok(())
}

/// Every manifest entry declared at exactly `block`, across all executor
/// classes: the input the allowance backfill loop credits (spec.md §4.3's
/// earning rule runs per-block, not per-class).
pub async fn manifests_at_block(pool: &PgPool, block: i64) -> sqlx::Result<Vec<Manifest>> {
    let rows: Vec<(String, String, i32, i32, i64)> = sqlx::query_as(
        "SELECT miner_hotkey, executor_class, declared_count, online_count, block \
         FROM miner_manifest WHERE block = $1",
    )
    .bind(block)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(miner, executor_class, declared_count, online_count, block)| Manifest {
            miner: miner.into(),
            executor_class: executor_class.into(),
            declared_count: declared_count as u32,
            online_count: online_count as u32,
            block,
        })
        .collect())
}

pub async fn insert_manifest(
    pool: &PgPool,
    miner: &Hotkey,
    executor_class: &str,
    declared_count: i32,
    online_count: i32,
    block: i64,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO miner_manifest (miner_hotkey, executor_class, declared_count, online_count, block) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(miner.as_str())
    .bind(executor_class)
    .bind(declared_count)
    .bind(online_count)
    .bind(block)
    .execute(pool)
    .await?;
    Ok(())
}
