//! Persists verified receipts, deduplicated by `(job_uuid, payload_type)`
//! (spec.md §4.6). The `validator` binary backs this with the `receipt`
//! Postgres table (SPEC_FULL.md §6-add); tests back it with an in-memory
//! set.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use compute_validator_common::ids::JobUuid;
use compute_validator_common::receipts::Receipt;

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Persists `receipt` unless `(job_uuid, kind_tag)` was already stored.
    /// Returns `true` if this call actually inserted a new row.
    async fn persist_if_new(&self, receipt: Receipt) -> bool;
}

#[derive(Default)]
pub struct InMemoryReceiptStore {
    seen: Mutex<HashSet<(JobUuid, &'static str)>>,
    receipts: Mutex<Vec<Receipt>>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn persist_if_new(&self, receipt: Receipt) -> bool {
        let key = (receipt.payload.job_uuid(), receipt.payload.kind_tag());
        let mut seen = self.seen.lock().expect("poisoned");
        if !seen.insert(key) {
            return false;
        }
        self.receipts.lock().expect("poisoned").push(receipt);
        true
    }
}
