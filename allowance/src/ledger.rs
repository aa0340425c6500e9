//! The Allowance Ledger (spec.md §4.3): turns `MetagraphSnapshot`-derived
//! credits into a per-miner executor-second balance and enforces I1-I3
//! under concurrent reservation attempts.
//!
//! Mutating operations run under a `tokio::sync::Mutex` keyed by
//! `(miner, executor_class)` (spec.md §4.3: "row-level mutual-exclusion"),
//! which is enough inside one process; the `ALLOWANCE_FETCHING` advisory
//! lock in [`crate::advisory_lock`] covers the cross-process backfill case.

use std::collections::HashMap;
use std::sync::Arc;

use compute_validator_common::ids::{BlockId, ExecutorClass, Hotkey};
use compute_validator_common::receipts::{Receipt, ReceiptPayload};
use compute_validator_common::signing::PublicKey;
use compute_validator_common::time::{get_current_time_in_seconds, TimestampSeconds};
use dashmap::DashMap;
use log::{info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AllowanceError, AllowanceResult};
use crate::types::{AllowanceCell, Reservation, ReservationId, ReservationState};

#[derive(Default, Clone)]
struct MinerClassBook {
    /// Credited executor-seconds per block, so garbage collection can drop
    /// blocks older than the retention horizon (spec.md §4.3, "Window").
    earned_by_block: HashMap<BlockId, f64>,
    reservations: HashMap<ReservationId, Reservation>,
}

impl MinerClassBook {
    fn earned(&self) -> f64 {
        self.earned_by_block.values().sum()
    }

    fn spent(&self) -> f64 {
        self.reservations
            .values()
            .filter(|r| r.state == ReservationState::Spent)
            .map(|r| r.amount_seconds)
            .sum()
    }

    fn active(&self) -> f64 {
        self.reservations
            .values()
            .filter(|r| r.state == ReservationState::Active)
            .map(|r| r.amount_seconds)
            .sum()
    }

    fn available(&self) -> f64 {
        (self.earned() - self.spent() - self.active()).max(0.0)
    }
}

/// (I2) helper: a `JobStartedReceipt` backs `reservation` iff its validator
/// signature verifies and its payload is a `JobStarted` for the same
/// `(miner, class)`, timestamped within `[reservation.created_at, now]`.
fn validate_receipt_backs_reservation(
    reservation_id: ReservationId,
    reservation: &Reservation,
    receipt: &Receipt,
    validator_key: &PublicKey,
) -> AllowanceResult<()> {
    let mismatch = |reason: &str| AllowanceError::ReceiptDoesNotBackReservation {
        reservation: reservation_id,
        reason: reason.to_string(),
    };

    if !receipt.verify_validator_signature(validator_key) {
        return Err(mismatch("validator signature does not verify"));
    }

    let payload = match &receipt.payload {
        ReceiptPayload::JobStarted(payload) => payload,
        _ => return Err(mismatch("receipt is not a JobStarted payload")),
    };

    if payload.miner != reservation.miner || payload.executor_class != reservation.executor_class {
        return Err(mismatch("receipt miner/executor_class does not match reservation"));
    }

    let now = get_current_time_in_seconds();
    if payload.timestamp < reservation.created_at {
        return Err(mismatch("receipt timestamp predates reservation creation"));
    }
    if payload.timestamp > now {
        return Err(mismatch("receipt timestamp is in the future"));
    }

    Ok(())
}

pub struct AllowanceLedger {
    books: DashMap<(Hotkey, ExecutorClass), Arc<Mutex<MinerClassBook>>>,
    retention_blocks: BlockId,
}

impl AllowanceLedger {
    pub fn new(retention_blocks: BlockId) -> Self {
        Self {
            books: DashMap::new(),
            retention_blocks,
        }
    }

    fn book_for(&self, miner: &Hotkey, class: &ExecutorClass) -> Arc<Mutex<MinerClassBook>> {
        self.books
            .entry((miner.clone(), class.clone()))
            .or_insert_with(|| Arc::new(Mutex::new(MinerClassBook::default())))
            .clone()
    }

    /// Credits a batch of cells (spec.md §4.3 earning rule). Idempotent per
    /// `(miner, class, block)`: re-crediting the same block overwrites
    /// rather than double-counts.
    pub async fn credit(&self, cells: &[AllowanceCell]) {
        for cell in cells {
            let book = self.book_for(&cell.miner, &cell.executor_class);
            let mut book = book.lock().await;
            book.earned_by_block.insert(cell.block, cell.earned_seconds);
        }
    }

    /// Drops blocks older than the retention horizon and finalizes any
    /// reservation whose creation block predates it (spec.md §4.3,
    /// "Window"). `current_block` anchors the horizon.
    pub async fn garbage_collect(&self, current_block: BlockId) {
        let cutoff = current_block - self.retention_blocks;
        for entry in self.books.iter() {
            let book = entry.value().clone();
            let mut book = book.lock().await;
            book.earned_by_block.retain(|block, _| *block >= cutoff);
        }
    }

    pub async fn available(&self, miner: &Hotkey, class: &ExecutorClass) -> f64 {
        let book = self.book_for(miner, class);
        let book = book.lock().await;
        book.available()
    }

    /// (I1) `spent + active <= earned`. Fails with
    /// `CannotReserveAllowance` when the request exceeds `available`.
    pub async fn reserve(
        &self,
        miner: &Hotkey,
        class: &ExecutorClass,
        seconds: f64,
    ) -> AllowanceResult<ReservationId> {
        let book = self.book_for(miner, class);
        let mut book = book.lock().await;
        let available = book.available();
        if seconds > available {
            return Err(AllowanceError::CannotReserveAllowance {
                miner: miner.clone(),
                class: class.clone(),
                required: seconds,
                available,
            });
        }

        let id = Uuid::new_v4();
        book.reservations.insert(
            id,
            Reservation {
                id,
                miner: miner.clone(),
                executor_class: class.clone(),
                amount_seconds: seconds,
                created_at: get_current_time_in_seconds(),
                state: ReservationState::Active,
                backed_by_job_started: false,
            },
        );
        Ok(id)
    }

    /// (I2) `active -> spent` exactly once, iff `receipt`'s validator
    /// signature verifies against `validator_key` and its payload aligns
    /// with this reservation: a `JobStarted` payload for the same
    /// `(miner, class)`, timestamped no earlier than the reservation's
    /// creation and no later than now (spec.md §4.3: "transitions
    /// active→spent iff receipt signature/timestamp align").
    pub async fn spend(
        &self,
        miner: &Hotkey,
        class: &ExecutorClass,
        reservation_id: ReservationId,
        receipt: &Receipt,
        validator_key: &PublicKey,
    ) -> AllowanceResult<()> {
        let book = self.book_for(miner, class);
        let mut book = book.lock().await;
        let reservation = book
            .reservations
            .get_mut(&reservation_id)
            .ok_or(AllowanceError::ReservationNotFound(reservation_id))?;

        match reservation.state {
            ReservationState::Active => {
                validate_receipt_backs_reservation(reservation_id, reservation, receipt, validator_key)?;
                reservation.state = ReservationState::Spent;
                reservation.backed_by_job_started = true;
                Ok(())
            }
            ReservationState::Spent => Err(AllowanceError::ReservationAlreadySpent(reservation_id)),
            ReservationState::Released | ReservationState::Expired => {
                Err(AllowanceError::ReservationNotFound(reservation_id))
            }
        }
    }

    /// `active -> released`. Idempotent on an already-released reservation
    /// (spec.md §4.3).
    pub async fn undo(
        &self,
        miner: &Hotkey,
        class: &ExecutorClass,
        reservation_id: ReservationId,
    ) -> AllowanceResult<()> {
        let book = self.book_for(miner, class);
        let mut book = book.lock().await;
        let reservation = book
            .reservations
            .get_mut(&reservation_id)
            .ok_or(AllowanceError::ReservationNotFound(reservation_id))?;

        match reservation.state {
            ReservationState::Active => {
                reservation.state = ReservationState::Released;
                Ok(())
            }
            ReservationState::Released => Ok(()),
            ReservationState::Spent => Err(AllowanceError::ReservationAlreadySpent(reservation_id)),
            ReservationState::Expired => Ok(()),
        }
    }

    /// (I3) sweeps preliminary reservations past their TTL that were never
    /// backed by a `JobStartedReceipt`.
    pub async fn expire_stale_preliminary_reservations(&self, ttl_seconds: u64) {
        let now = get_current_time_in_seconds();
        for entry in self.books.iter() {
            let book = entry.value().clone();
            let mut book = book.lock().await;
            for reservation in book.reservations.values_mut() {
                if reservation.state == ReservationState::Active
                    && !reservation.backed_by_job_started
                    && now.saturating_sub(reservation.created_at) >= ttl_seconds
                {
                    reservation.state = ReservationState::Expired;
                }
            }
        }
    }

    /// Count of currently-active preliminary reservations for `(miner,
    /// class)`, used by the router's busy/preliminary-reservation checks.
    pub async fn live_preliminary_reservations(
        &self,
        miner: &Hotkey,
        class: &ExecutorClass,
        ttl_seconds: u64,
    ) -> usize {
        let book = self.book_for(miner, class);
        let book = book.lock().await;
        let now = get_current_time_in_seconds();
        book.reservations
            .values()
            .filter(|r| r.is_preliminary_and_live(now, ttl_seconds))
            .count()
    }

    /// Best miner with at least `seconds` available for `class`, excluding
    /// `excluded`, tie-broken by ascending hotkey (spec.md §4.3/§4.1-add).
    pub async fn find_best_miner(
        &self,
        candidates: &[Hotkey],
        class: &ExecutorClass,
        seconds: f64,
        excluded: &std::collections::HashSet<Hotkey>,
    ) -> AllowanceResult<Hotkey> {
        let mut best: Option<(Hotkey, f64)> = None;
        let mut best_available = 0.0_f64;
        let mut best_unspent = 0.0_f64;

        for miner in candidates {
            if excluded.contains(miner) {
                continue;
            }
            let available = self.available(miner, class).await;
            if available > best_unspent {
                best_unspent = available;
            }
            if available >= seconds {
                best_available = best_available.max(available);
                best = match best {
                    Some((ref current_best, current_avail))
                        if current_avail > available
                            || (current_avail == available && current_best <= miner) =>
                    {
                        best
                    }
                    _ => Some((miner.clone(), available)),
                };
            }
        }

        best.map(|(hotkey, _)| hotkey).ok_or_else(|| {
            warn!(
                "no miner met allowance requirement of {seconds}s for class {class}; best_available={best_available}, best_unspent={best_unspent}"
            );
            AllowanceError::NotEnoughAllowance {
                class: class.clone(),
                required: seconds,
                best_available,
                best_unspent,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

impl Default for AllowanceLedger {
    fn default() -> Self {
        info!("constructing allowance ledger with default retention");
        Self::new(7200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use compute_validator_common::ids::JobUuid;
    use compute_validator_common::receipts::JobStartedPayload;
    use compute_validator_common::signing::{Ed25519SigningOracle, SigningOracle};

    fn cell(miner: &str, class: &str, block: BlockId, earned: f64) -> AllowanceCell {
        AllowanceCell {
            miner: miner.into(),
            executor_class: class.into(),
            block,
            earned_seconds: earned,
        }
    }

    fn job_started_receipt(
        oracle: &Ed25519SigningOracle,
        miner: &Hotkey,
        class: &ExecutorClass,
        timestamp: TimestampSeconds,
    ) -> Receipt {
        let payload = ReceiptPayload::JobStarted(JobStartedPayload {
            job_uuid: JobUuid::new_v4(),
            miner: miner.clone(),
            validator: "validator-1".into(),
            timestamp,
            executor_class: class.clone(),
            max_timeout_seconds: 300,
            is_synthetic_job: false,
        });
        let sig = oracle.sign(&Receipt::canonical_bytes(&payload));
        Receipt {
            payload,
            validator_sig: sig,
            miner_sig: None,
        }
    }

    #[tokio::test]
    async fn reserve_fails_when_exceeding_available() {
        let ledger = AllowanceLedger::new(1000);
        ledger.credit(&[cell("m1", "a6000", 1, 10.0)]).await;
        let result = ledger.reserve(&"m1".into(), &"a6000".into(), 20.0).await;
        assert!(matches!(
            result,
            Err(AllowanceError::CannotReserveAllowance { .. })
        ));
    }

    #[tokio::test]
    async fn reserve_then_spend_then_cannot_spend_twice() {
        let ledger = AllowanceLedger::new(1000);
        ledger.credit(&[cell("m1", "a6000", 1, 100.0)]).await;
        let miner: Hotkey = "m1".into();
        let class: ExecutorClass = "a6000".into();
        let id = ledger.reserve(&miner, &class, 10.0).await.unwrap();

        let oracle = Ed25519SigningOracle::generate();
        let now = get_current_time_in_seconds();
        let receipt = job_started_receipt(&oracle, &miner, &class, now);

        ledger.spend(&miner, &class, id, &receipt, &oracle.public_key()).await.unwrap();
        let result = ledger.spend(&miner, &class, id, &receipt, &oracle.public_key()).await;
        assert!(matches!(result, Err(AllowanceError::ReservationAlreadySpent(_))));
    }

    #[tokio::test]
    async fn spend_rejects_receipt_with_wrong_signature() {
        let ledger = AllowanceLedger::new(1000);
        ledger.credit(&[cell("m1", "a6000", 1, 100.0)]).await;
        let miner: Hotkey = "m1".into();
        let class: ExecutorClass = "a6000".into();
        let id = ledger.reserve(&miner, &class, 10.0).await.unwrap();

        let signer = Ed25519SigningOracle::generate();
        let other = Ed25519SigningOracle::generate();
        let now = get_current_time_in_seconds();
        let receipt = job_started_receipt(&signer, &miner, &class, now);

        let result = ledger.spend(&miner, &class, id, &receipt, &other.public_key()).await;
        assert!(matches!(
            result,
            Err(AllowanceError::ReceiptDoesNotBackReservation { .. })
        ));
        // rejection leaves the reservation active, still occupying allowance
        let available = ledger.available(&miner, &class).await;
        assert_eq!(available, 90.0);
    }

    #[tokio::test]
    async fn spend_rejects_receipt_for_a_different_miner() {
        let ledger = AllowanceLedger::new(1000);
        ledger.credit(&[cell("m1", "a6000", 1, 100.0)]).await;
        let miner: Hotkey = "m1".into();
        let class: ExecutorClass = "a6000".into();
        let id = ledger.reserve(&miner, &class, 10.0).await.unwrap();

        let oracle = Ed25519SigningOracle::generate();
        let now = get_current_time_in_seconds();
        let receipt = job_started_receipt(&oracle, &"m2".into(), &class, now);

        let result = ledger.spend(&miner, &class, id, &receipt, &oracle.public_key()).await;
        assert!(matches!(
            result,
            Err(AllowanceError::ReceiptDoesNotBackReservation { .. })
        ));
    }

    #[tokio::test]
    async fn spend_rejects_receipt_timestamped_before_reservation() {
        let ledger = AllowanceLedger::new(1000);
        ledger.credit(&[cell("m1", "a6000", 1, 100.0)]).await;
        let miner: Hotkey = "m1".into();
        let class: ExecutorClass = "a6000".into();
        let id = ledger.reserve(&miner, &class, 10.0).await.unwrap();

        let oracle = Ed25519SigningOracle::generate();
        let receipt = job_started_receipt(&oracle, &miner, &class, 1);

        let result = ledger.spend(&miner, &class, id, &receipt, &oracle.public_key()).await;
        assert!(matches!(
            result,
            Err(AllowanceError::ReceiptDoesNotBackReservation { .. })
        ));
    }

    #[tokio::test]
    async fn undo_is_idempotent() {
        let ledger = AllowanceLedger::new(1000);
        ledger.credit(&[cell("m1", "a6000", 1, 100.0)]).await;
        let miner: Hotkey = "m1".into();
        let class: ExecutorClass = "a6000".into();
        let id = ledger.reserve(&miner, &class, 10.0).await.unwrap();
        ledger.undo(&miner, &class, id).await.unwrap();
        ledger.undo(&miner, &class, id).await.unwrap();
    }

    #[tokio::test]
    async fn spent_plus_active_never_exceeds_earned_under_concurrent_reserves() {
        let ledger = Arc::new(AllowanceLedger::new(1000));
        ledger.credit(&[cell("m1", "a6000", 1, 50.0)]).await;
        let miner: Hotkey = "m1".into();
        let class: ExecutorClass = "a6000".into();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            let miner = miner.clone();
            let class = class.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve(&miner, &class, 10.0).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        // Only 5 of the 10 concurrent 10s reservations can fit in 50s.
        assert_eq!(ok, 5);
        let available = ledger.available(&miner, &class).await;
        assert_eq!(available, 0.0);
    }

    #[tokio::test]
    async fn stale_preliminary_reservation_expires() {
        let ledger = AllowanceLedger::new(1000);
        ledger.credit(&[cell("m1", "a6000", 1, 50.0)]).await;
        let miner: Hotkey = "m1".into();
        let class: ExecutorClass = "a6000".into();
        let _id = ledger.reserve(&miner, &class, 10.0).await.unwrap();

        ledger.expire_stale_preliminary_reservations(0).await;
        let available = ledger.available(&miner, &class).await;
        assert_eq!(available, 50.0);
    }

    #[tokio::test]
    async fn find_best_miner_picks_highest_available_and_breaks_ties_by_hotkey() {
        let ledger = AllowanceLedger::new(1000);
        ledger
            .credit(&[
                cell("bravo", "a6000", 1, 50.0),
                cell("alpha", "a6000", 1, 50.0),
                cell("charlie", "a6000", 1, 20.0),
            ])
            .await;
        let candidates = vec!["alpha".into(), "bravo".into(), "charlie".into()];
        let class: ExecutorClass = "a6000".into();
        let best = ledger
            .find_best_miner(&candidates, &class, 10.0, &Default::default())
            .await
            .unwrap();
        assert_eq!(best.as_str(), "alpha");
    }

    #[tokio::test]
    async fn find_best_miner_reports_diagnostics_when_nobody_qualifies() {
        let ledger = AllowanceLedger::new(1000);
        ledger.credit(&[cell("m1", "a6000", 1, 5.0)]).await;
        let candidates = vec!["m1".into()];
        let class: ExecutorClass = "a6000".into();
        let result = ledger
            .find_best_miner(&candidates, &class, 10.0, &Default::default())
            .await;
        match result {
            Err(AllowanceError::NotEnoughAllowance {
                best_available,
                best_unspent,
                ..
            }) => {
                assert_eq!(best_available, 0.0);
                assert_eq!(best_unspent, 5.0);
            }
            other => panic!("expected NotEnoughAllowance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_collection_drops_blocks_outside_retention() {
        let ledger = AllowanceLedger::new(10);
        ledger.credit(&[cell("m1", "a6000", 1, 100.0)]).await;
        ledger.garbage_collect(1000).await;
        let available = ledger.available(&"m1".into(), &"a6000".into()).await;
        assert_eq!(available, 0.0);
    }
}
