//! The excuse policy (spec.md §4.4): a miner that declines a job as BUSY
//! must be able to show, for each of its declared `online_count` slots, a
//! `JobStarted` receipt signed by some other validator with stake at or
//! above the floor, dated no later than the job request, for the same
//! executor class and not from a synthetic job.

use std::collections::HashSet;

use async_trait::async_trait;
use compute_validator_common::ids::{ExecutorClass, Hotkey};
use compute_validator_common::receipts::{Receipt, ReceiptPayload};
use compute_validator_common::time::TimestampSeconds;

/// Resolves a validator hotkey to its current stake, so the excuse policy
/// can enforce `DynamicOptions::minimum_validator_stake_for_excuse` (spec.md
/// §4.4) against the validators who signed a miner's excuse receipts. The
/// `validator` binary backs this with the same metagraph snapshot the
/// allowance backfill consumes; job-driver calls it once per distinct
/// validator in a BUSY decline's excuse set.
#[async_trait]
pub trait ValidatorStakeLookup: Send + Sync {
    async fn stake_of(&self, validator: &Hotkey) -> Option<f64>;
}

/// Returns `true` if `excuses` account for the miner's full declared
/// `online_count`, i.e. the BUSY decline is justified and the miner should
/// not be blacklisted for it. `minimum_validator_stake` is
/// `DynamicOptions::minimum_validator_stake_for_excuse` (spec.md §6).
pub fn excuses_justify_busy_decline(
    excuses: &[Receipt],
    miner: &Hotkey,
    class: &ExecutorClass,
    online_count: u32,
    job_request_time: TimestampSeconds,
    minimum_validator_stake: f64,
    validator_stake: impl Fn(&Hotkey) -> Option<f64>,
) -> bool {
    let mut seen_jobs = HashSet::new();

    let valid_excuses = excuses
        .iter()
        .filter(|receipt| {
            let ReceiptPayload::JobStarted(payload) = &receipt.payload else {
                return false;
            };
            if &payload.miner != miner {
                return false;
            }
            if &payload.executor_class != class {
                return false;
            }
            if payload.is_synthetic_job {
                return false;
            }
            if payload.timestamp > job_request_time {
                return false;
            }
            match validator_stake(&payload.validator) {
                Some(stake) if stake >= minimum_validator_stake => {}
                _ => return false,
            }
            seen_jobs.insert(payload.job_uuid)
        })
        .count();

    valid_excuses >= online_count as usize
}

/// Fixture stake table for tests and for wiring a preloaded validator set.
#[derive(Default)]
pub struct FixedStakeLookup {
    pub stakes: std::collections::HashMap<Hotkey, f64>,
}

#[async_trait]
impl ValidatorStakeLookup for FixedStakeLookup {
    async fn stake_of(&self, validator: &Hotkey) -> Option<f64> {
        self.stakes.get(validator).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute_validator_common::ids::JobUuid;
    use compute_validator_common::receipts::JobStartedPayload;
    use compute_validator_common::signing::SigningOracle;

    fn receipt(
        job_uuid: JobUuid,
        miner: &str,
        validator: &str,
        timestamp: TimestampSeconds,
        class: &str,
        synthetic: bool,
    ) -> Receipt {
        let payload = ReceiptPayload::JobStarted(JobStartedPayload {
            job_uuid,
            miner: miner.into(),
            validator: validator.into(),
            timestamp,
            executor_class: class.into(),
            max_timeout_seconds: 300,
            is_synthetic_job: synthetic,
        });
        let oracle = compute_validator_common::signing::Ed25519SigningOracle::generate();
        let sig = oracle.sign(&Receipt::canonical_bytes(&payload));
        Receipt {
            payload,
            validator_sig: sig,
            miner_sig: None,
        }
    }

    const FLOOR: f64 = 1000.0;

    fn always_staked(_: &Hotkey) -> Option<f64> {
        Some(FLOOR * 2.0)
    }

    #[test]
    fn enough_distinct_excuses_justify_decline() {
        let excuses = vec![
            receipt(JobUuid::new_v4(), "m1", "v1", 100, "a6000", false),
            receipt(JobUuid::new_v4(), "m1", "v2", 100, "a6000", false),
        ];
        assert!(excuses_justify_busy_decline(
            &excuses,
            &"m1".into(),
            &"a6000".into(),
            2,
            200,
            FLOOR,
            always_staked,
        ));
    }

    #[test]
    fn too_few_excuses_do_not_justify_decline() {
        let excuses = vec![receipt(JobUuid::new_v4(), "m1", "v1", 100, "a6000", false)];
        assert!(!excuses_justify_busy_decline(
            &excuses,
            &"m1".into(),
            &"a6000".into(),
            2,
            200,
            FLOOR,
            always_staked,
        ));
    }

    #[test]
    fn synthetic_job_excuses_do_not_count() {
        let excuses = vec![receipt(JobUuid::new_v4(), "m1", "v1", 100, "a6000", true)];
        assert!(!excuses_justify_busy_decline(
            &excuses,
            &"m1".into(),
            &"a6000".into(),
            1,
            200,
            FLOOR,
            always_staked,
        ));
    }

    #[test]
    fn excuses_from_after_the_job_request_do_not_count() {
        let excuses = vec![receipt(JobUuid::new_v4(), "m1", "v1", 300, "a6000", false)];
        assert!(!excuses_justify_busy_decline(
            &excuses,
            &"m1".into(),
            &"a6000".into(),
            1,
            200,
            FLOOR,
            always_staked,
        ));
    }

    #[test]
    fn excuses_from_underbonded_validators_do_not_count() {
        let excuses = vec![receipt(JobUuid::new_v4(), "m1", "v1", 100, "a6000", false)];
        assert!(!excuses_justify_busy_decline(
            &excuses,
            &"m1".into(),
            &"a6000".into(),
            1,
            200,
            FLOOR,
            |_| Some(1.0),
        ));
    }

    #[test]
    fn duplicate_job_uuid_only_counts_once() {
        let job_uuid = JobUuid::new_v4();
        let excuses = vec![
            receipt(job_uuid, "m1", "v1", 100, "a6000", false),
            receipt(job_uuid, "m1", "v2", 100, "a6000", false),
        ];
        assert!(!excuses_justify_busy_decline(
            &excuses,
            &"m1".into(),
            &"a6000".into(),
            2,
            200,
            FLOOR,
            always_staked,
        ));
    }
}
