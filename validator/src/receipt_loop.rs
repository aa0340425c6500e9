//! Drives the receipt transfer sweep (spec.md §4.6): a one-shot catch-up
//! over the cold window, followed by a keep-up loop that repeatedly
//! re-sweeps the hot window on `DynamicOptions::receipt_transfer_interval`.

use std::sync::Arc;
use std::time::Duration;

use compute_validator_common::config::{
    DynamicConfig, RECEIPT_TRANSFER_CATCHUP_CONCURRENCY, RECEIPT_TRANSFER_ONCE_CONCURRENCY,
};
use futures::future::join_all;
use log::info;
use metrics::counter;

/// `RECEIPT_TRANSFER_ENABLED` kill-switch: "sleep 60s and re-check" (spec.md
/// §4.6), not the dynamic keep-up interval.
const DISABLED_RECHECK_SECONDS: u64 = 60;

use receipt_transfer::{all_pages, cold_pages, hot_pages, transfer_one_page, MinerRegistry, PageFetcher, ReceiptStore, SweepStats, ValidatorKeyResolver};

use crate::metrics::names;

pub struct ReceiptTransfer {
    pub fetcher: Arc<dyn PageFetcher>,
    pub store: Arc<dyn ReceiptStore>,
    pub keys: Arc<dyn ValidatorKeyResolver>,
    pub registry: Arc<dyn MinerRegistry>,
    pub dynamic_config: Arc<dyn DynamicConfig>,
    pub page_duration_seconds: u64,
    pub n_active_pages: u32,
    pub cold_cutoff_seconds: u64,
}

impl ReceiptTransfer {
    /// Sweeps `all_pages` for every known miner, once. Used by the `Once`
    /// CLI subcommand and as the very first thing the daemon does before
    /// entering `keep_up`.
    pub async fn transfer_once(&self, now: u64) -> SweepStats {
        let pages = all_pages(now, self.page_duration_seconds, self.cold_cutoff_seconds);
        self.sweep_pages(&pages, RECEIPT_TRANSFER_ONCE_CONCURRENCY).await
    }

    async fn catch_up(&self, now: u64) -> SweepStats {
        let pages = cold_pages(now, self.page_duration_seconds, self.n_active_pages, self.cold_cutoff_seconds);
        self.sweep_pages(&pages, RECEIPT_TRANSFER_CATCHUP_CONCURRENCY).await
    }

    async fn keep_up_once(&self, now: u64) -> SweepStats {
        let pages = hot_pages(now, self.page_duration_seconds, self.n_active_pages);
        self.sweep_pages(&pages, RECEIPT_TRANSFER_ONCE_CONCURRENCY).await
    }

    async fn sweep_pages(&self, pages: &[receipt_transfer::Page], concurrency: usize) -> SweepStats {
        let miners = self.registry.all_miners().await;
        let mut stats = SweepStats::default();

        let mut work = Vec::with_capacity(miners.len() * pages.len());
        for miner in &miners {
            for &page in pages {
                work.push((miner.clone(), page));
            }
        }

        for chunk in work.chunks(concurrency.max(1)) {
            let results = join_all(chunk.iter().map(|(miner, page)| {
                transfer_one_page(self.fetcher.as_ref(), self.store.as_ref(), self.keys.as_ref(), miner, *page)
            }))
            .await;
            for result in results {
                stats.merge(result);
            }
        }

        counter!(names::RECEIPT_SWEEP_PAGES_FETCHED_TOTAL).increment(stats.pages_fetched);
        counter!(names::RECEIPT_SWEEP_PERSISTED_TOTAL).increment(stats.receipts_persisted);
        stats
    }

    /// Returns `true` (after sleeping `DISABLED_RECHECK_SECONDS`) if the
    /// kill-switch is currently off; callers should `continue` their loop
    /// in that case instead of sweeping (spec.md §4.6: "before every
    /// iteration consult RECEIPT_TRANSFER_ENABLED; if false, sleep 60s and
    /// re-check").
    async fn sleep_while_disabled(&self) -> bool {
        let options = self.dynamic_config.current().await;
        if options.receipt_transfer_enabled {
            return false;
        }
        tokio::time::sleep(Duration::from_secs(DISABLED_RECHECK_SECONDS)).await;
        true
    }

    /// The catch-up loop: sweeps cold pages newest-first, forever. Once a
    /// pass finds nothing new to catch up on, pages only turn cold as they
    /// age out of the hot window, so it waits a full page width before
    /// re-checking rather than busy-resweeping the same range.
    async fn catch_up_loop(&self) {
        loop {
            if self.sleep_while_disabled().await {
                continue;
            }
            let now = compute_validator_common::time::get_current_time_in_seconds();
            let stats = self.catch_up(now).await;
            info!("receipt transfer catch-up sweep complete: {stats:?}");
            tokio::time::sleep(Duration::from_secs(self.page_duration_seconds)).await;
        }
    }

    /// The keep-up loop: re-sweeps the hot window every
    /// `receipt_transfer_interval`, sleeping only the remainder of the
    /// interval if a pass finishes early (spec.md §4.6).
    async fn keep_up_loop(&self) {
        loop {
            if self.sleep_while_disabled().await {
                continue;
            }
            let options = self.dynamic_config.current().await;
            let started = tokio::time::Instant::now();
            let now = compute_validator_common::time::get_current_time_in_seconds();
            let stats = self.keep_up_once(now).await;
            info!("receipt transfer keep-up sweep complete: {stats:?}");

            let interval = options.receipt_transfer_interval();
            let elapsed = started.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
    }

    /// Runs forever (spec.md §4.6): first an initial keep-up sweep over the
    /// hot pages, then the catch-up (cold) and keep-up (hot) loops
    /// concurrently, each independently re-checking the
    /// `receipt_transfer_enabled` kill-switch every iteration.
    pub async fn run_daemon(&self) {
        let now = compute_validator_common::time::get_current_time_in_seconds();
        let initial_stats = self.keep_up_once(now).await;
        info!("receipt transfer initial keep-up sweep complete: {initial_stats:?}");

        tokio::join!(self.catch_up_loop(), self.keep_up_loop());
    }
}
