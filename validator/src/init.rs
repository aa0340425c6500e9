//! Process-wide singleton construction (SPEC_FULL.md §5-add: "constructed
//! by an explicit `init()` ... returning a handle ... never accessed
//! through a global"). Called once from `main`, the resulting handles are
//! threaded into every router/driver/transfer constructor that needs them.

use std::sync::Arc;

use chain_oracle::{ArchiveFallbackOracle, ChainOracleApi, ChainView};
use chain_oracle::rpc::{ChainEndpoints, JsonRpcChainOracle};
use prefetch_cache::{PrefetchCache, SledBackend};

use crate::config::ValidatorConfig;

/// A ready-to-clone Oracle factory: the prefetch cache spawns one worker
/// task per configured concurrency slot, and each needs its own Oracle
/// handle and connection rather than sharing one across tasks (spec.md §9,
/// "Blocking-inside-async").
pub fn oracle_factory(config: &ValidatorConfig) -> impl Fn() -> ArchiveFallbackOracle<JsonRpcChainOracle> + Send + Sync + Clone {
    let endpoints = ChainEndpoints {
        lite_url: config.chain_lite_url.clone(),
        archive_url: config.chain_archive_url.clone(),
    };
    move || ArchiveFallbackOracle::new(JsonRpcChainOracle::new(endpoints.clone()))
}

pub fn chain_oracle(config: &ValidatorConfig) -> Arc<dyn ChainOracleApi> {
    Arc::new(oracle_factory(config)())
}

pub fn prefetch_cache(
    config: &ValidatorConfig,
) -> anyhow::Result<Arc<PrefetchCache<ArchiveFallbackOracle<JsonRpcChainOracle>, SledBackend>>> {
    let db = sled::open(&config.cache_dir)?;
    let backend = Arc::new(SledBackend::open(&db, "prefetch_cache")?);
    let factory = oracle_factory(config);
    Ok(PrefetchCache::start(factory, backend, ChainView::Lite, config.prefetch_workers))
}
