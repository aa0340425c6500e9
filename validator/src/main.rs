//! Validator daemon entry point. Wires C1-C7 into the two subcommands
//! spec.md §6 implies an operator drives from the CLI: `run` (the full
//! daemon) and `transfer-receipts-once` (a standalone sweep, e.g. for a
//! cron-triggered catch-up outside the long-running process).
//!
//! The facilitator websocket transport and the miner-side protocol
//! endpoint are explicit non-goals (spec.md §1): this binary stands up
//! every in-scope subsystem (prefetch cache, allowance ledger, receipt
//! transfer, metrics, persistence) and exposes the seams
//! (`FacilitatorLink`, `MinerTransportFactory`) a deployment's transport
//! layer plugs into; it does not itself dial either wire protocol.

mod allowance_backfill;
mod config;
mod facilitator;
mod init;
mod metrics;
mod organic;
mod persistence;
mod receipt_loop;

use std::sync::Arc;

use clap::Parser;
use compute_validator_common::config::{
    ALLOWANCE_BACKFILL_POLL_SECONDS, DynamicConfig, N_ACTIVE_PAGES_DEFAULT,
    RECEIPT_TRANSFER_COLD_CUTOFF_SECONDS, RECEIPT_TRANSFER_PAGE_DURATION_SECONDS,
};
use compute_validator_common::signing::Ed25519SigningOracle;
use log::info;

use allowance::AllowanceLedger;
use chain_oracle::ChainView;

use crate::allowance_backfill::AllowanceBackfill;
use crate::config::{Command, ValidatorConfig};
use crate::facilitator::NullFacilitatorLink;
use crate::organic::{OrganicJobService, UnconfiguredTransportFactory};
use crate::persistence::advisory_lock::PostgresAdvisoryLock;
use crate::persistence::blacklist::PostgresBlacklist;
use crate::persistence::directory::PostgresMinerDirectory;
use crate::persistence::dynamic_config::PostgresDynamicConfig;
use crate::persistence::miners::{
    PostgresMinerRegistry, PostgresValidatorKeyResolver, PostgresValidatorStakeLookup,
};
use crate::persistence::receipts::PostgresReceiptStore;
use crate::persistence::system_events::PostgresSystemEventSink;
use crate::receipt_loop::ReceiptTransfer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = ValidatorConfig::parse();

    info!("connecting to database");
    let pool = persistence::connect(&config.database_url).await?;
    persistence::migrate(&pool).await?;

    let dynamic_config_store = PostgresDynamicConfig::new(pool.clone());
    dynamic_config_store.ensure_seeded().await?;
    let dynamic_config: Arc<dyn DynamicConfig> = Arc::new(dynamic_config_store);

    metrics::install(&config.metrics_addr)?;

    let receipt_transfer = ReceiptTransfer {
        fetcher: Arc::new(receipt_transfer::HttpPageFetcher::new(
            std::time::Duration::from_secs(3),
            |miner: &compute_validator_common::ids::Hotkey| format!("http://{}", miner.as_str()),
        )),
        store: Arc::new(PostgresReceiptStore::new(pool.clone(), RECEIPT_TRANSFER_PAGE_DURATION_SECONDS)),
        keys: Arc::new(PostgresValidatorKeyResolver::new(pool.clone())),
        registry: Arc::new(PostgresMinerRegistry::new(pool.clone())),
        dynamic_config: dynamic_config.clone(),
        page_duration_seconds: RECEIPT_TRANSFER_PAGE_DURATION_SECONDS,
        n_active_pages: N_ACTIVE_PAGES_DEFAULT,
        cold_cutoff_seconds: RECEIPT_TRANSFER_COLD_CUTOFF_SECONDS,
    };

    let command = config.command.clone();
    match command {
        Command::TransferReceiptsOnce => {
            let now = compute_validator_common::time::get_current_time_in_seconds();
            let stats = receipt_transfer.transfer_once(now).await;
            info!("one-shot receipt transfer complete: {stats:?}");
            Ok(())
        }
        Command::Run => run_daemon(config, pool, dynamic_config, receipt_transfer).await,
    }
}

async fn run_daemon(
    config: ValidatorConfig,
    pool: sqlx::PgPool,
    dynamic_config: Arc<dyn DynamicConfig>,
    receipt_transfer: ReceiptTransfer,
) -> anyhow::Result<()> {
    let cache = init::prefetch_cache(&config)?;
    info!("prefetch cache started with {} workers", config.prefetch_workers);

    let signing_key = config.parse_signing_key()?;
    let ledger = Arc::new(AllowanceLedger::new(compute_validator_common::config::LITE_LOOKBACK_BLOCKS));

    let directory = Arc::new(PostgresMinerDirectory::new(pool.clone()));
    let blacklist = Arc::new(PostgresBlacklist::new(pool.clone()));
    let options = dynamic_config.current().await;
    let router = Arc::new(router::MinerRouter::new(
        directory,
        blacklist.clone(),
        ledger.clone(),
        options.routing_preliminary_reservation_time_seconds,
    ));
    let system_events = Arc::new(PostgresSystemEventSink::new(pool.clone()));

    let signing_oracle = Arc::new(Ed25519SigningOracle::from_secret_bytes(signing_key)?);
    let organic = Arc::new(OrganicJobService::new(
        config.hotkey.clone().into(),
        router,
        ledger.clone(),
        signing_oracle,
        Arc::new(UnconfiguredTransportFactory),
        Arc::new(artifacts::VolumeDownloaderRegistry::new(
            reqwest::Client::new(),
            compute_validator_common::config::MAX_SIZE_BYTES_DEFAULT,
        )),
        Arc::new(artifacts::OutputUploaderRegistry::new(reqwest::Client::new())),
        dynamic_config.clone(),
        Arc::new(NullFacilitatorLink),
        system_events,
        blacklist,
        Arc::new(PostgresValidatorStakeLookup::new(pool.clone())),
    ));

    // Drives every inbound facilitator message (spec.md §4.4-§4.7) into the
    // organic job service. `NullFacilitatorLink::recv` never resolves until
    // a deployment substitutes a real websocket client, so this loop is
    // structurally complete but dormant until that seam is wired.
    let facilitator_handle = tokio::spawn({
        let organic = organic.clone();
        async move {
            let mut link = NullFacilitatorLink;
            loop {
                match crate::facilitator::FacilitatorLink::recv(&mut link).await {
                    Some(crate::facilitator::FacilitatorInbound::OrganicJobRequest(request)) => {
                        let organic = organic.clone();
                        tokio::spawn(async move { organic.handle(request).await });
                    }
                    Some(crate::facilitator::FacilitatorInbound::JobCheated(report)) => {
                        let organic = organic.clone();
                        tokio::spawn(async move { organic.handle_cheated(report).await });
                    }
                    None => {
                        info!("facilitator link closed, stopping organic job dispatch");
                        break;
                    }
                }
            }
        }
    });

    let backfill_oracle = init::chain_oracle(&config);
    let fallback_start_block = backfill_oracle
        .oldest_reachable_block(ChainView::Lite)
        .await
        .unwrap_or(0);
    let backfill = AllowanceBackfill {
        cache: cache.clone(),
        oracle: backfill_oracle,
        lock: Arc::new(PostgresAdvisoryLock::new(pool.clone())),
        ledger: ledger.clone(),
        pool: pool.clone(),
        view: ChainView::Lite,
    };
    let backfill_handle = tokio::spawn(async move {
        backfill
            .run(
                fallback_start_block,
                std::time::Duration::from_secs(ALLOWANCE_BACKFILL_POLL_SECONDS),
            )
            .await;
    });

    let receipt_transfer_handle = tokio::spawn(async move {
        receipt_transfer.run_daemon().await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, draining background loops");
        }
        _ = receipt_transfer_handle => {
            info!("receipt transfer daemon exited unexpectedly");
        }
        _ = backfill_handle => {
            info!("allowance backfill loop exited unexpectedly");
        }
        _ = facilitator_handle => {
            info!("facilitator dispatch loop exited unexpectedly");
        }
    }

    Ok(())
}
