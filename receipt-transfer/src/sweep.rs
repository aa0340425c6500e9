//! The per-transfer contract (spec.md §4.6): fetch one `(miner, page)`
//! delta, parse newline-delimited signed receipts, verify signatures,
//! dedupe, persist, and count errors by kind. A single miner's failure
//! never fails the whole sweep.

use compute_validator_common::ids::Hotkey;
use compute_validator_common::receipts::Receipt;
use log::{debug, warn};

use crate::client::PageFetcher;
use crate::keys::ValidatorKeyResolver;
use crate::page::Page;
use crate::store::ReceiptStore;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub pages_fetched: u64,
    pub receipts_persisted: u64,
    pub receipts_deduped: u64,
    pub parse_errors: u64,
    pub verify_errors: u64,
    pub transfer_errors: u64,
}

impl SweepStats {
    pub fn merge(&mut self, other: SweepStats) {
        self.pages_fetched += other.pages_fetched;
        self.receipts_persisted += other.receipts_persisted;
        self.receipts_deduped += other.receipts_deduped;
        self.parse_errors += other.parse_errors;
        self.verify_errors += other.verify_errors;
        self.transfer_errors += other.transfer_errors;
    }
}

/// Transfers a single `(miner, page)`. Never returns `Err`: every failure
/// mode (transport, parse, verify) is folded into `SweepStats` so a caller
/// driving many of these concurrently never has to special-case one bad
/// miner (spec.md §4.6, "never fail the whole sweep").
pub async fn transfer_one_page(
    fetcher: &dyn PageFetcher,
    store: &dyn ReceiptStore,
    keys: &dyn ValidatorKeyResolver,
    miner: &Hotkey,
    page: Page,
) -> SweepStats {
    let mut stats = SweepStats::default();

    let body = match fetcher.fetch_page(miner, page).await {
        Ok(Some(body)) => body,
        Ok(None) => return stats,
        Err(err) => {
            warn!("receipt transfer failed for miner {miner} page {page}: {err}");
            stats.transfer_errors += 1;
            return stats;
        }
    };
    stats.pages_fetched += 1;

    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let receipt: Receipt = match serde_json::from_str(line) {
            Ok(receipt) => receipt,
            Err(err) => {
                debug!("unparseable receipt line from miner {miner} page {page}: {err}");
                stats.parse_errors += 1;
                continue;
            }
        };

        match resolve_and_verify(&receipt, keys).await {
            Ok(true) => {
                if store.persist_if_new(receipt).await {
                    stats.receipts_persisted += 1;
                } else {
                    stats.receipts_deduped += 1;
                }
            }
            Ok(false) | Err(()) => stats.verify_errors += 1,
        }
    }

    stats
}

async fn resolve_and_verify(receipt: &Receipt, keys: &dyn ValidatorKeyResolver) -> Result<bool, ()> {
    let validator_hotkey = payload_validator(receipt);
    let Some(key) = keys.public_key_for(&validator_hotkey).await else {
        return Err(());
    };
    Ok(receipt.verify_validator_signature(&key))
}

fn payload_validator(receipt: &Receipt) -> Hotkey {
    use compute_validator_common::receipts::ReceiptPayload;
    match &receipt.payload {
        ReceiptPayload::JobStarted(p) => p.validator.clone(),
        ReceiptPayload::JobAccepted(p) => p.validator.clone(),
        ReceiptPayload::JobFinished(p) => p.validator.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use compute_validator_common::ids::JobUuid;
    use compute_validator_common::receipts::{JobStartedPayload, ReceiptPayload};
    use compute_validator_common::signing::{Ed25519SigningOracle, PublicKey, SigningOracle};

    use super::*;
    use crate::error::ReceiptTransferResult;

    struct FixtureFetcher {
        pages: Mutex<HashMap<(Hotkey, Page), ReceiptTransferResult<Option<String>>>>,
    }

    #[async_trait]
    impl PageFetcher for FixtureFetcher {
        async fn fetch_page(&self, miner: &Hotkey, page: Page) -> ReceiptTransferResult<Option<String>> {
            self.pages
                .lock()
                .expect("poisoned")
                .remove(&(miner.clone(), page))
                .unwrap_or(Ok(None))
        }
    }

    struct FixtureKeys {
        key: PublicKey,
    }

    #[async_trait]
    impl ValidatorKeyResolver for FixtureKeys {
        async fn public_key_for(&self, _validator: &Hotkey) -> Option<PublicKey> {
            Some(self.key.clone())
        }
    }

    fn signed_line(oracle: &Ed25519SigningOracle, job_uuid: JobUuid) -> String {
        let payload = ReceiptPayload::JobStarted(JobStartedPayload {
            job_uuid,
            miner: "miner-1".into(),
            validator: "validator-1".into(),
            timestamp: 1_700_000_000,
            executor_class: "a6000".into(),
            max_timeout_seconds: 300,
            is_synthetic_job: false,
        });
        let sig = oracle.sign(&Receipt::canonical_bytes(&payload));
        let receipt = Receipt {
            payload,
            validator_sig: sig,
            miner_sig: None,
        };
        serde_json::to_string(&receipt).expect("receipt serializes")
    }

    #[tokio::test]
    async fn empty_page_returns_zeroed_stats() {
        let fetcher = FixtureFetcher { pages: Mutex::new(HashMap::new()) };
        let store = InMemoryReceiptStore::new();
        let oracle = Ed25519SigningOracle::generate();
        let keys = FixtureKeys { key: oracle.public_key() };

        let stats = transfer_one_page(&fetcher, &store, &keys, &"miner-1".into(), 0).await;
        assert_eq!(stats, SweepStats::default());
    }

    #[tokio::test]
    async fn valid_receipts_persist_and_dedupe() {
        let oracle = Ed25519SigningOracle::generate();
        let line = signed_line(&oracle, JobUuid::new_v4());
        let body = format!("{line}\n{line}\n");

        let mut pages = HashMap::new();
        pages.insert(("miner-1".into(), 0), Ok(Some(body)));
        let fetcher = FixtureFetcher { pages: Mutex::new(pages) };
        let store = InMemoryReceiptStore::new();
        let keys = FixtureKeys { key: oracle.public_key() };

        let stats = transfer_one_page(&fetcher, &store, &keys, &"miner-1".into(), 0).await;
        assert_eq!(stats.pages_fetched, 1);
        assert_eq!(stats.receipts_persisted, 1);
        assert_eq!(stats.receipts_deduped, 1);
        assert_eq!(store.receipts().len(), 1);
    }

    #[tokio::test]
    async fn unparseable_line_counts_as_parse_error_without_failing_sweep() {
        let oracle = Ed25519SigningOracle::generate();
        let good = signed_line(&oracle, JobUuid::new_v4());
        let body = format!("not json\n{good}\n");

        let mut pages = HashMap::new();
        pages.insert(("miner-1".into(), 0), Ok(Some(body)));
        let fetcher = FixtureFetcher { pages: Mutex::new(pages) };
        let store = InMemoryReceiptStore::new();
        let keys = FixtureKeys { key: oracle.public_key() };

        let stats = transfer_one_page(&fetcher, &store, &keys, &"miner-1".into(), 0).await;
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.receipts_persisted, 1);
    }

    #[tokio::test]
    async fn bad_signature_counts_as_verify_error() {
        let signer = Ed25519SigningOracle::generate();
        let other = Ed25519SigningOracle::generate();
        let line = signed_line(&signer, JobUuid::new_v4());

        let mut pages = HashMap::new();
        pages.insert(("miner-1".into(), 0), Ok(Some(line)));
        let fetcher = FixtureFetcher { pages: Mutex::new(pages) };
        let store = InMemoryReceiptStore::new();
        let keys = FixtureKeys { key: other.public_key() };

        let stats = transfer_one_page(&fetcher, &store, &keys, &"miner-1".into(), 0).await;
        assert_eq!(stats.verify_errors, 1);
        assert_eq!(stats.receipts_persisted, 0);
    }

    #[tokio::test]
    async fn transport_failure_counts_as_transfer_error_and_never_panics() {
        let mut pages = HashMap::new();
        pages.insert(
            ("miner-1".into(), 0),
            Err(ReceiptTransferError::Transport("connection refused".into())),
        );
        let fetcher = FixtureFetcher { pages: Mutex::new(pages) };
        let store = InMemoryReceiptStore::new();
        let oracle = Ed25519SigningOracle::generate();
        let keys = FixtureKeys { key: oracle.public_key() };

        let stats = transfer_one_page(&fetcher, &store, &keys, &"miner-1".into(), 0).await;
        assert_eq!(stats.transfer_errors, 1);
        assert_eq!(stats.pages_fetched, 0);
    }

    #[test]
    fn merge_sums_all_fields() {
        let mut a = SweepStats { pages_fetched: 1, receipts_persisted: 2, ..Default::default() };
        let b = SweepStats { parse_errors: 3, verify_errors: 4, transfer_errors: 5, receipts_deduped: 6, ..Default::default() };
        a.merge(b);
        assert_eq!(a, SweepStats {
            pages_fetched: 1,
            receipts_persisted: 2,
            receipts_deduped: 6,
            parse_errors: 3,
            verify_errors: 4,
            transfer_errors: 5,
        });
    }
}
