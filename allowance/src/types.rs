use std::fmt;

use compute_validator_common::ids::{BlockId, ExecutorClass, Hotkey};
use compute_validator_common::time::TimestampSeconds;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared per synthetic-job batch (spec.md §3): bounds routing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub miner: Hotkey,
    pub executor_class: ExecutorClass,
    pub declared_count: u32,
    pub online_count: u32,
    pub block: BlockId,
}

/// Per-`(miner_hotkey, executor_class, block)` earned executor-seconds
/// (spec.md §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllowanceCell {
    pub miner: Hotkey,
    pub executor_class: ExecutorClass,
    pub block: BlockId,
    pub earned_seconds: f64,
}

pub type ReservationId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationState {
    Active,
    Spent,
    Released,
    Expired,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationState::Active => "active",
            ReservationState::Spent => "spent",
            ReservationState::Released => "released",
            ReservationState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// `{id, miner, executor_class, amount_seconds, created_at, state}`
/// (spec.md §3). Either a preliminary routing hold or a confirmed spend
/// following a `JobStartedReceipt`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub miner: Hotkey,
    pub executor_class: ExecutorClass,
    pub amount_seconds: f64,
    pub created_at: TimestampSeconds,
    pub state: ReservationState,
    /// Set once a `JobStartedReceipt` has backed this reservation
    /// (I3: preliminary reservations auto-expire unless backed by one).
    pub backed_by_job_started: bool,
}

impl Reservation {
    pub fn is_preliminary_and_live(&self, now: TimestampSeconds, ttl_seconds: u64) -> bool {
        self.state == ReservationState::Active
            && !self.backed_by_job_started
            && now.saturating_sub(self.created_at) < ttl_seconds
    }
}
