//! `router::MinerDirectory` backed by the `miner_manifest` and `receipt`
//! tables: the latest manifest per `(miner, class)` and a count of
//! `JobStarted` receipts still inside their preliminary window stand in
//! for the live in-flight job count (spec.md §4.4, steps 2-3).

use async_trait::async_trait;
use compute_validator_common::ids::{ExecutorClass, Hotkey};
use sqlx::PgPool;

use allowance::Manifest;
use router::MinerDirectory;

pub struct PostgresMinerDirectory {
    pool: PgPool,
}

impl PostgresMinerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MinerDirectory for PostgresMinerDirectory {
    async fn manifests_for_class(&self, class: &ExecutorClass) -> Vec<Manifest> {
        let rows: Vec<(String, String, i32, i32, i64)> = sqlx::query_as(
            "SELECT DISTINCT ON (miner_hotkey) miner_hotkey, executor_class, declared_count, online_count, block \
             FROM miner_manifest \
             WHERE executor_class = $1 AND online_count > 0 \
             ORDER BY miner_hotkey, block DESC",
        )
        .bind(class.as_str())
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();

        rows.into_iter()
            .map(|(miner, executor_class, declared_count, online_count, block)| Manifest {
                miner: miner.into(),
                executor_class: executor_class.into(),
                declared_count: declared_count as u32,
                online_count: online_count as u32,
                block,
            })
            .collect()
    }

    async fn active_job_started_count(&self, miner: &Hotkey, class: &ExecutorClass) -> usize {
        let row: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM organic_job \
             WHERE miner_hotkey = $1 AND executor_class = $2 AND status IN ('sent', 'accepted', 'ready', 'running', 'volumes_ready')",
        )
        .bind(miner.as_str())
        .bind(class.as_str())
        .fetch_one(&self.pool)
        .await
        .unwrap_or((0,));
        row.0.max(0) as usize
    }
}
