//! Drives the Allowance Ledger's earning loop (spec.md §4.3, data flow
//! `C1 -> C2 -> C3`): walks each new block through the prefetch cache,
//! reads the manifests already declared for that block (declared by the
//! sibling synthetic-job-scheduling subsystem - spec.md §1 non-goal, only
//! its manifest output is consumed here), restricts credit to miners
//! still `serving` per that block's neuron list, and credits the ledger.
//!
//! Guarded by the cross-process `ALLOWANCE_FETCHING` advisory lock
//! (spec.md §4.3: "ensures at most one process is backfilling blocks at a
//! time; contenders observe `Locked` and no-op") so a multi-process
//! deployment doesn't double-credit. Resumes from the `cycle` table's
//! high-water mark on restart instead of re-crediting from scratch.

use std::sync::Arc;
use std::time::Duration;

use allowance::advisory_lock::{AdvisoryLock, ALLOWANCE_FETCHING_LOCK, ALLOWANCE_FETCHING_LOCK_TTL};
use allowance::earning::{block_duration_seconds, credit_block};
use allowance::AllowanceLedger;
use chain_oracle::{ChainOracleApi, ChainView};
use compute_validator_common::ids::BlockId;
use log::{debug, warn};
use prefetch_cache::PrefetchCacheApi;
use sqlx::PgPool;

use crate::persistence::miners::manifests_at_block;

pub struct AllowanceBackfill<C: PrefetchCacheApi + 'static> {
    pub cache: Arc<C>,
    pub oracle: Arc<dyn ChainOracleApi>,
    pub lock: Arc<dyn AdvisoryLock>,
    pub ledger: Arc<AllowanceLedger>,
    pub pool: PgPool,
    pub view: ChainView,
}

impl<C: PrefetchCacheApi + 'static> AllowanceBackfill<C> {
    /// Runs forever, polling every `poll_interval` for newly-available
    /// blocks since the last processed one and crediting the ledger for
    /// each (spec.md §4.3). A lock contention or a transient read failure
    /// just defers to the next tick rather than treating either as fatal.
    pub async fn run(&self, fallback_start_block: BlockId, poll_interval: Duration) {
        loop {
            let guard = match self.lock.try_acquire(ALLOWANCE_FETCHING_LOCK).await {
                Some(guard) => guard,
                None => {
                    debug!("another process holds {ALLOWANCE_FETCHING_LOCK}, skipping this tick");
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };

            if let Err(err) = self.catch_up_once(fallback_start_block).await {
                warn!("allowance backfill tick failed: {err}");
            }

            drop(guard);
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Credits every block from the last processed one (exclusive) up to
    /// `current_block` (exclusive - spec.md §4.1: `current_block` is
    /// already `chain_head - 5` to avoid reorgs), holding the advisory
    /// lock no longer than the bounded `ALLOWANCE_FETCHING_LOCK_TTL` work
    /// unit per block (spec.md §5).
    async fn catch_up_once(&self, fallback_start_block: BlockId) -> anyhow::Result<()> {
        let current = self.oracle.current_block(self.view).await?;
        let mut cursor = crate::persistence::cycle::last_processed_block(&self.pool, fallback_start_block).await;
        let mut previous_timestamp: Option<u64> = None;

        while cursor < current {
            let block = cursor + 1;
            let deadline = tokio::time::Instant::now() + ALLOWANCE_FETCHING_LOCK_TTL;

            self.credit_one_block(block, &mut previous_timestamp).await?;
            crate::persistence::cycle::record_processed_block(&self.pool, block).await?;
            cursor = block;

            if tokio::time::Instant::now() >= deadline {
                debug!("allowance backfill yielding after its bounded work unit at block {block}");
                break;
            }
        }

        Ok(())
    }

    async fn credit_one_block(&self, block: BlockId, previous_timestamp: &mut Option<u64>) -> anyhow::Result<()> {
        let manifests = manifests_at_block(&self.pool, block).await?;
        if manifests.is_empty() {
            return Ok(());
        }

        let neurons = self
            .cache
            .list_neurons(self.oracle.as_ref(), block, false)
            .await?;
        let serving: std::collections::HashSet<_> = neurons
            .into_iter()
            .filter(|n| n.is_serving())
            .map(|n| n.hotkey)
            .collect();

        let serving_manifests: Vec<_> = manifests
            .into_iter()
            .filter(|m| serving.contains(&m.miner))
            .collect();
        if serving_manifests.is_empty() {
            return Ok(());
        }

        let timestamp = self
            .cache
            .block_timestamp(self.oracle.as_ref(), block, false)
            .await?;
        let duration = block_duration_seconds(timestamp, *previous_timestamp);
        *previous_timestamp = Some(timestamp);

        let cells = credit_block(&serving_manifests, block, duration);
        self.ledger.credit(&cells).await;
        self.ledger.garbage_collect(block).await;
        Ok(())
    }
}
