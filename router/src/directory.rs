//! Directory of miner capacity facts the selector needs but does not own:
//! manifests and in-flight `JobStartedReceipt` counts. The `validator`
//! binary backs this with the `miner_manifest`/`receipt` tables
//! (SPEC_FULL.md §6-add); tests back it with an in-memory fixture.

use async_trait::async_trait;
use compute_validator_common::ids::{ExecutorClass, Hotkey};

use allowance::Manifest;

#[async_trait]
pub trait MinerDirectory: Send + Sync {
    /// Miners with a recent manifest declaring `online_count > 0` for
    /// `class` (spec.md §4.4, step 2).
    async fn manifests_for_class(&self, class: &ExecutorClass) -> Vec<Manifest>;

    /// Count of currently-active `JobStartedReceipt`s for `(miner, class)`
    /// within their TTL (spec.md §4.4, step 3).
    async fn active_job_started_count(&self, miner: &Hotkey, class: &ExecutorClass) -> usize;
}

/// Simple in-memory fixture for tests.
#[derive(Default)]
pub struct FixtureDirectory {
    pub manifests: Vec<Manifest>,
    pub active_job_started: std::collections::HashMap<(Hotkey, ExecutorClass), usize>,
}

#[async_trait]
impl MinerDirectory for FixtureDirectory {
    async fn manifests_for_class(&self, class: &ExecutorClass) -> Vec<Manifest> {
        self.manifests
            .iter()
            .filter(|m| &m.executor_class == class && m.online_count > 0)
            .cloned()
            .collect()
    }

    async fn active_job_started_count(&self, miner: &Hotkey, class: &ExecutorClass) -> usize {
        self.active_job_started
            .get(&(miner.clone(), class.clone()))
            .copied()
            .unwrap_or(0)
    }
}
