//! The miner selection algorithm (spec.md §4.4). Six steps: gather
//! candidate manifests for the class, drop blacklisted miners (unless the
//! request is trusted), drop miners already saturated with in-flight work,
//! bail out if nobody is left, pick the best-allowance miner among the
//! survivors, then atomically reserve against it.

use std::collections::HashSet;
use std::sync::Arc;

use compute_validator_common::ids::{ExecutorClass, Hotkey};

use allowance::{AllowanceLedger, ReservationId};

use crate::blacklist::BlacklistStore;
use crate::directory::MinerDirectory;
use crate::error::{RouterError, RouterResult};

/// A request to route a single job to one miner.
#[derive(Clone, Debug)]
pub struct JobRequest {
    pub executor_class: ExecutorClass,
    /// Seconds of executor time to reserve against the winning miner's
    /// allowance (spec.md §4.3).
    pub required_seconds: f64,
    /// Trusted organic job events bypass the blacklist, mirroring
    /// `DynamicOptions::disable_trusted_organic_job_events` (spec.md §6):
    /// when that flag is left at its default `false`, trusted requests
    /// still skip the blacklist check.
    pub trusted: bool,
}

/// Per-stage timeouts carried alongside a picked miner so the job driver
/// (C5) doesn't need to re-read dynamic config mid-flight (spec.md §5).
#[derive(Clone, Copy, Debug)]
pub struct JobTimeouts {
    pub initial_response: std::time::Duration,
    pub executor_ready: std::time::Duration,
    pub total: std::time::Duration,
}

#[derive(Clone, Debug)]
pub struct PickedMiner {
    pub miner: Hotkey,
    pub reservation_id: ReservationId,
    /// The winning manifest's declared `online_count`, carried along so the
    /// job driver can apply the excuse policy (spec.md §4.4) without a
    /// second directory round-trip.
    pub online_count: u32,
}

pub struct MinerRouter {
    directory: Arc<dyn MinerDirectory>,
    blacklist: Arc<dyn BlacklistStore>,
    ledger: Arc<AllowanceLedger>,
    preliminary_reservation_ttl_seconds: u64,
}

impl MinerRouter {
    pub fn new(
        directory: Arc<dyn MinerDirectory>,
        blacklist: Arc<dyn BlacklistStore>,
        ledger: Arc<AllowanceLedger>,
        preliminary_reservation_ttl_seconds: u64,
    ) -> Self {
        Self {
            directory,
            blacklist,
            ledger,
            preliminary_reservation_ttl_seconds,
        }
    }

    pub async fn pick_miner(&self, request: &JobRequest) -> RouterResult<PickedMiner> {
        let manifests = self
            .directory
            .manifests_for_class(&request.executor_class)
            .await;
        if manifests.is_empty() {
            return Err(RouterError::NoMinerForExecutorType(
                request.executor_class.clone(),
            ));
        }

        let mut excluded: HashSet<Hotkey> = HashSet::new();
        let mut candidates = Vec::with_capacity(manifests.len());

        for manifest in &manifests {
            if !request.trusted && self.blacklist.is_blacklisted(&manifest.miner).await {
                excluded.insert(manifest.miner.clone());
                continue;
            }

            let busy = self
                .directory
                .active_job_started_count(&manifest.miner, &request.executor_class)
                .await
                + self
                    .ledger
                    .live_preliminary_reservations(
                        &manifest.miner,
                        &request.executor_class,
                        self.preliminary_reservation_ttl_seconds,
                    )
                    .await;
            if busy >= manifest.online_count as usize {
                excluded.insert(manifest.miner.clone());
                continue;
            }

            candidates.push(manifest.miner.clone());
        }

        if candidates.is_empty() {
            return Err(RouterError::AllMinersBusy(request.executor_class.clone()));
        }

        let miner = self
            .ledger
            .find_best_miner(
                &candidates,
                &request.executor_class,
                request.required_seconds,
                &excluded,
            )
            .await?;

        let reservation_id = self
            .ledger
            .reserve(&miner, &request.executor_class, request.required_seconds)
            .await?;

        let online_count = manifests
            .iter()
            .find(|m| m.miner == miner)
            .map(|m| m.online_count)
            .unwrap_or(1);

        Ok(PickedMiner {
            miner,
            reservation_id,
            online_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::InMemoryBlacklist;
    use crate::directory::FixtureDirectory;
    use allowance::Manifest;
    use std::time::Duration;

    fn manifest(miner: &str, class: &str, online_count: u32) -> Manifest {
        Manifest {
            miner: miner.into(),
            executor_class: class.into(),
            declared_count: online_count,
            online_count,
            block: 1,
        }
    }

    async fn ledger_with_allowance(miner: &str, class: &str, seconds: f64) -> Arc<AllowanceLedger> {
        let ledger = Arc::new(AllowanceLedger::new(1000));
        ledger
            .credit(&[allowance::types::AllowanceCell {
                miner: miner.into(),
                executor_class: class.into(),
                block: 1,
                earned_seconds: seconds,
            }])
            .await;
        ledger
    }

    #[tokio::test]
    async fn errors_when_no_manifest_declares_the_class() {
        let directory = Arc::new(FixtureDirectory::default());
        let blacklist = Arc::new(InMemoryBlacklist::new());
        let ledger = Arc::new(AllowanceLedger::new(1000));
        let router = MinerRouter::new(directory, blacklist, ledger, 5);

        let request = JobRequest {
            executor_class: "a6000".into(),
            required_seconds: 10.0,
            trusted: false,
        };
        let result = router.pick_miner(&request).await;
        assert!(matches!(result, Err(RouterError::NoMinerForExecutorType(_))));
    }

    #[tokio::test]
    async fn picks_the_only_eligible_miner_and_reserves_allowance() {
        let directory = Arc::new(FixtureDirectory {
            manifests: vec![manifest("m1", "a6000", 2)],
            active_job_started: Default::default(),
        });
        let blacklist = Arc::new(InMemoryBlacklist::new());
        let ledger = ledger_with_allowance("m1", "a6000", 100.0).await;
        let router = MinerRouter::new(directory, blacklist, ledger.clone(), 5);

        let request = JobRequest {
            executor_class: "a6000".into(),
            required_seconds: 10.0,
            trusted: false,
        };
        let picked = router.pick_miner(&request).await.unwrap();
        assert_eq!(picked.miner.as_str(), "m1");
        assert_eq!(ledger.available(&"m1".into(), &"a6000".into()).await, 90.0);
    }

    #[tokio::test]
    async fn blacklisted_miner_is_excluded_unless_trusted() {
        let directory = Arc::new(FixtureDirectory {
            manifests: vec![manifest("m1", "a6000", 2)],
            active_job_started: Default::default(),
        });
        let blacklist = Arc::new(InMemoryBlacklist::new());
        blacklist
            .blacklist(&"m1".into(), "busy without excuse".into(), Duration::from_secs(60))
            .await;
        let ledger = ledger_with_allowance("m1", "a6000", 100.0).await;
        let router = MinerRouter::new(directory, blacklist, ledger, 5);

        let request = JobRequest {
            executor_class: "a6000".into(),
            required_seconds: 10.0,
            trusted: false,
        };
        let result = router.pick_miner(&request).await;
        assert!(matches!(result, Err(RouterError::AllMinersBusy(_))));
    }

    #[tokio::test]
    async fn trusted_requests_bypass_the_blacklist() {
        let directory = Arc::new(FixtureDirectory {
            manifests: vec![manifest("m1", "a6000", 2)],
            active_job_started: Default::default(),
        });
        let blacklist = Arc::new(InMemoryBlacklist::new());
        blacklist
            .blacklist(&"m1".into(), "busy without excuse".into(), Duration::from_secs(60))
            .await;
        let ledger = ledger_with_allowance("m1", "a6000", 100.0).await;
        let router = MinerRouter::new(directory, blacklist, ledger, 5);

        let request = JobRequest {
            executor_class: "a6000".into(),
            required_seconds: 10.0,
            trusted: true,
        };
        let picked = router.pick_miner(&request).await.unwrap();
        assert_eq!(picked.miner.as_str(), "m1");
    }

    #[tokio::test]
    async fn miner_at_capacity_is_treated_as_busy() {
        let mut active = std::collections::HashMap::new();
        active.insert(("m1".into(), "a6000".into()), 2);
        let directory = Arc::new(FixtureDirectory {
            manifests: vec![manifest("m1", "a6000", 2)],
            active_job_started: active,
        });
        let blacklist = Arc::new(InMemoryBlacklist::new());
        let ledger = ledger_with_allowance("m1", "a6000", 100.0).await;
        let router = MinerRouter::new(directory, blacklist, ledger, 5);

        let request = JobRequest {
            executor_class: "a6000".into(),
            required_seconds: 10.0,
            trusted: false,
        };
        let result = router.pick_miner(&request).await;
        assert!(matches!(result, Err(RouterError::AllMinersBusy(_))));
    }
}
