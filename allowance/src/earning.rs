//! The earning rule (spec.md §4.3 and SPEC_FULL.md §4.1-add): deterministic
//! given the chain inputs, policy-tunable in its weighting. Each serving
//! miner in each executor class is credited proportionally to its
//! manifest-declared online slot count, pro-rated by block duration.

use compute_validator_common::ids::BlockId;

use crate::types::{AllowanceCell, Manifest};

/// Nominal block duration used when no previous block timestamp is
/// available (e.g. the first block of a retention window).
pub const NOMINAL_BLOCK_DURATION_SECONDS: f64 = 12.0;

pub fn block_duration_seconds(
    block_timestamp: u64,
    previous_block_timestamp: Option<u64>,
) -> f64 {
    match previous_block_timestamp {
        Some(prev) if block_timestamp > prev => (block_timestamp - prev) as f64,
        _ => NOMINAL_BLOCK_DURATION_SECONDS,
    }
}

/// Credits a single manifest entry for one block.
pub fn credit_for_manifest(manifest: &Manifest, block: BlockId, duration_seconds: f64) -> AllowanceCell {
    AllowanceCell {
        miner: manifest.miner.clone(),
        executor_class: manifest.executor_class.clone(),
        block,
        earned_seconds: manifest.online_count as f64 * duration_seconds,
    }
}

/// Credits every manifest entry declared at `block`.
pub fn credit_block(manifests: &[Manifest], block: BlockId, duration_seconds: f64) -> Vec<AllowanceCell> {
    manifests
        .iter()
        .filter(|m| m.block == block)
        .map(|m| credit_for_manifest(m, block, duration_seconds))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(miner: &str, class: &str, online: u32, block: BlockId) -> Manifest {
        Manifest {
            miner: miner.into(),
            executor_class: class.into(),
            declared_count: online,
            online_count: online,
            block,
        }
    }

    #[test]
    fn duration_derives_from_consecutive_timestamps() {
        assert_eq!(block_duration_seconds(112, Some(100)), 12.0);
    }

    #[test]
    fn duration_falls_back_to_nominal_without_a_previous_block() {
        assert_eq!(block_duration_seconds(100, None), NOMINAL_BLOCK_DURATION_SECONDS);
    }

    #[test]
    fn duration_falls_back_to_nominal_on_non_monotonic_timestamps() {
        assert_eq!(block_duration_seconds(100, Some(200)), NOMINAL_BLOCK_DURATION_SECONDS);
    }

    #[test]
    fn credit_is_proportional_to_online_count_and_duration() {
        let m = manifest("miner-1", "a6000", 4, 10);
        let cell = credit_for_manifest(&m, 10, 12.0);
        assert_eq!(cell.earned_seconds, 48.0);
    }

    #[test]
    fn credit_block_only_includes_manifests_declared_at_that_block() {
        let manifests = vec![manifest("m1", "a6000", 2, 10), manifest("m2", "a6000", 2, 11)];
        let cells = credit_block(&manifests, 10, 12.0);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].miner.as_str(), "m1");
    }
}
