//! `receipt_transfer::ReceiptStore` backed by the `receipt` table,
//! deduplicated by its `(job_uuid, payload_type)` primary key (spec.md
//! §4.6).

use async_trait::async_trait;
use compute_validator_common::receipts::{Receipt, ReceiptPayload};
use log::warn;
use sqlx::PgPool;

use receipt_transfer::{page, ReceiptStore};

pub struct PostgresReceiptStore {
    pool: PgPool,
    page_duration_seconds: u64,
}

impl PostgresReceiptStore {
    pub fn new(pool: PgPool, page_duration_seconds: u64) -> Self {
        Self {
            pool,
            page_duration_seconds,
        }
    }
}

#[async_trait]
impl ReceiptStore for PostgresReceiptStore {
    async fn persist_if_new(&self, receipt: Receipt) -> bool {
        let validator_hotkey = match &receipt.payload {
            ReceiptPayload::JobStarted(p) => p.validator.clone(),
            ReceiptPayload::JobAccepted(p) => p.validator.clone(),
            ReceiptPayload::JobFinished(p) => p.validator.clone(),
        };
        let raw = match serde_json::to_value(&receipt) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to serialize receipt for persistence: {err}");
                return false;
            }
        };
        let page = page::page(receipt.payload.timestamp(), self.page_duration_seconds);

        let result = sqlx::query(
            "INSERT INTO receipt (job_uuid, payload_type, miner_hotkey, validator_hotkey, \"timestamp\", page, raw) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (job_uuid, payload_type) DO NOTHING",
        )
        .bind(receipt.payload.job_uuid())
        .bind(receipt.payload.kind_tag())
        .bind(receipt.payload.miner().as_str())
        .bind(validator_hotkey.as_str())
        .bind(receipt.payload.timestamp() as i64)
        .bind(page)
        .bind(raw)
        .execute(&self.pool)
        .await;

        match result {
            Ok(result) => result.rows_affected() == 1,
            Err(err) => {
                warn!("failed to persist receipt {}: {err}", receipt.payload.job_uuid());
                false
            }
        }
    }
}
