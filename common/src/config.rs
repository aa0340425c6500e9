//! Dynamic configuration (spec.md §6): options that operators can change at
//! runtime without restarting the process, mirroring the original's
//! Celery-beat-refreshed config rows with a simple polled trait instead.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The "recognized dynamic options" from spec.md §6.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicOptions {
    pub routing_preliminary_reservation_time_seconds: u64,
    pub organic_job_timeout_seconds: u64,
    pub organic_job_initial_response_timeout_seconds: u64,
    pub organic_job_executor_ready_timeout_seconds: u64,
    pub job_cheated_blacklist_time_seconds: u64,
    pub minimum_validator_stake_for_excuse: f64,
    pub receipt_transfer_enabled: bool,
    pub receipt_transfer_interval_seconds: u64,
    pub disable_trusted_organic_job_events: bool,
}

impl Default for DynamicOptions {
    fn default() -> Self {
        Self {
            routing_preliminary_reservation_time_seconds: 5,
            organic_job_timeout_seconds: 300,
            organic_job_initial_response_timeout_seconds: 3,
            organic_job_executor_ready_timeout_seconds: 30,
            job_cheated_blacklist_time_seconds: 7 * 24 * 3600,
            minimum_validator_stake_for_excuse: 1000.0,
            receipt_transfer_enabled: true,
            receipt_transfer_interval_seconds: 30,
            disable_trusted_organic_job_events: false,
        }
    }
}

impl DynamicOptions {
    pub fn preliminary_reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.routing_preliminary_reservation_time_seconds)
    }

    pub fn total_job_timeout(&self) -> Duration {
        Duration::from_secs(self.organic_job_timeout_seconds)
    }

    pub fn initial_response_timeout(&self) -> Duration {
        Duration::from_secs(self.organic_job_initial_response_timeout_seconds)
    }

    pub fn executor_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.organic_job_executor_ready_timeout_seconds)
    }

    pub fn job_cheated_blacklist_ttl(&self) -> Duration {
        Duration::from_secs(self.job_cheated_blacklist_time_seconds)
    }

    pub fn receipt_transfer_interval(&self) -> Duration {
        Duration::from_secs(self.receipt_transfer_interval_seconds)
    }
}

/// Abstracts "where dynamic options live" so the validator binary can back
/// it with a polled Postgres table while tests back it with a static value.
#[async_trait]
pub trait DynamicConfig: Send + Sync {
    async fn current(&self) -> DynamicOptions;
}

/// A `DynamicConfig` that never changes; useful in tests and as a fallback
/// when no store is configured.
pub struct StaticDynamicConfig(pub DynamicOptions);

#[async_trait]
impl DynamicConfig for StaticDynamicConfig {
    async fn current(&self) -> DynamicOptions {
        self.0.clone()
    }
}

pub const LITE_LOOKBACK_BLOCKS: i64 = 200;
pub const CACHE_AHEAD_BLOCKS: i64 = 10;
pub const DEFAULT_PREFETCH_WORKERS: usize = 10;
pub const N_ACTIVE_PAGES_DEFAULT: u32 = 2;
pub const RECEIPT_TRANSFER_ONCE_CONCURRENCY: usize = 50;
pub const RECEIPT_TRANSFER_CATCHUP_CONCURRENCY: usize = 10;
pub const RECEIPT_TRANSFER_PAGE_DURATION_SECONDS: u64 = 3600;
pub const RECEIPT_TRANSFER_COLD_CUTOFF_SECONDS: u64 = 5 * 3600;
pub const MAX_SIZE_BYTES_DEFAULT: u64 = 2 * 1024 * 1024 * 1024;
pub const MAX_NUMBER_OF_FILES: usize = 1000;
pub const MAX_CONCURRENT_UPLOADS: usize = 3;
pub const OUTPUT_UPLOAD_TIMEOUT_SECONDS: u64 = 300;
pub const MINIMUM_VALIDATOR_STAKE: f64 = 1000.0;
pub const ALLOWANCE_BACKFILL_POLL_SECONDS: u64 = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_config_returns_same_value() {
        let cfg = StaticDynamicConfig(DynamicOptions::default());
        let a = cfg.current().await;
        let b = cfg.current().await;
        assert_eq!(a, b);
    }
}
