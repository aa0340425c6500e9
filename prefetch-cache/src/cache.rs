//! Forward-looking, multi-worker precache in front of the Chain Oracle
//! (spec.md §4.2). A single producer advances `highest_submitted` as long
//! as it trails `highest_requested` by less than `CACHE_AHEAD` blocks and
//! stays behind `current_block` (spec.md §9, Open Question: gated by a
//! freshness check against `current_block` on every iteration, so the
//! producer never busy-sleeps on blocks that cannot exist yet).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chain_oracle::{ChainOracleApi, ChainOracleError, ChainView};
use compute_validator_common::config::{CACHE_AHEAD_BLOCKS, DEFAULT_PREFETCH_WORKERS};
use compute_validator_common::encoding::{decode, encode};
use compute_validator_common::ids::BlockId;
use compute_validator_common::time::TimestampSeconds;
use log::{debug, error, warn};
use tokio::sync::mpsc;

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult};
use crate::kind::DatumKind;

type WorkItem = (DatumKind, BlockId);

pub struct PrefetchCache<O: ChainOracleApi + 'static, B: CacheBackend + 'static> {
    oracle_factory: Arc<dyn Fn() -> O + Send + Sync>,
    backend: Arc<B>,
    view: ChainView,
    highest_submitted: AtomicI64,
    highest_requested: AtomicI64,
    closing: Arc<AtomicBool>,
    work_tx: mpsc::Sender<WorkItem>,
}

impl<O: ChainOracleApi + 'static, B: CacheBackend + 'static> PrefetchCache<O, B> {
    /// `oracle_factory` builds an independent Oracle handle per worker
    /// (spec.md §9, "Blocking-inside-async": each worker owns its own
    /// Oracle handle and event loop).
    pub fn start(
        oracle_factory: impl Fn() -> O + Send + Sync + 'static,
        backend: Arc<B>,
        view: ChainView,
        num_workers: usize,
    ) -> Arc<Self> {
        let (work_tx, work_rx) = mpsc::channel(num_workers * 4 + CACHE_AHEAD_BLOCKS as usize);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));

        let cache = Arc::new(Self {
            oracle_factory: Arc::new(oracle_factory),
            backend,
            view,
            highest_submitted: AtomicI64::new(-1),
            highest_requested: AtomicI64::new(-1),
            closing: Arc::new(AtomicBool::new(false)),
            work_tx,
        });

        for worker_id in 0..num_workers.max(1) {
            let cache = Arc::clone(&cache);
            let work_rx = Arc::clone(&work_rx);
            let oracle = (cache.oracle_factory)();
            tokio::spawn(async move {
                cache.worker_loop(worker_id, oracle, work_rx).await;
            });
        }

        {
            let cache = Arc::clone(&cache);
            let oracle = (cache.oracle_factory)();
            tokio::spawn(async move {
                cache.producer_loop(oracle).await;
            });
        }

        cache
    }

    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Nudges the producer forward: called by every consumer read.
    fn note_requested(&self, block: BlockId) {
        self.highest_requested.fetch_max(block, Ordering::SeqCst);
    }

    async fn producer_loop(self: Arc<Self>, oracle: O) {
        loop {
            if self.is_closing() {
                debug!("prefetch producer observed closing flag, draining");
                return;
            }

            let current = match oracle.current_block(self.view).await {
                Ok(b) => b,
                Err(e) => {
                    warn!("producer failed to read current_block: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let submitted = self.highest_submitted.load(Ordering::SeqCst);
            let requested = self.highest_requested.load(Ordering::SeqCst);

            // Freshness gate (spec.md §9 Open Question): never submit a
            // block that has not happened yet, even if `requested` is
            // wildly ahead of `current`.
            let ahead_ok = submitted - requested < CACHE_AHEAD_BLOCKS;
            let fresh_ok = submitted < current;

            if ahead_ok && fresh_ok {
                let next = submitted + 1;
                for kind in DatumKind::ALL {
                    if self.work_tx.send((kind, next)).await.is_err() {
                        return;
                    }
                }
                self.highest_submitted.store(next, Ordering::SeqCst);
            } else {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        oracle: O,
        work_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    ) {
        loop {
            if self.is_closing() {
                debug!("prefetch worker {worker_id} observed closing flag, draining");
                return;
            }

            let item = {
                let mut rx = work_rx.lock().await;
                rx.recv().await
            };
            let Some((kind, block)) = item else {
                return;
            };

            if let Err(e) = self.fetch_and_store(&oracle, kind, block).await {
                match e {
                    CacheError::Oracle(ChainOracleError::ArchiveNotConfigured) => {
                        debug!("worker {worker_id} dropping task for {kind:?}@{block}: no archive configured");
                    }
                    other => {
                        error!("worker {worker_id} failed {kind:?}@{block}: {other}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    async fn fetch_and_store(&self, oracle: &O, kind: DatumKind, block: BlockId) -> CacheResult<()> {
        match kind {
            DatumKind::Neurons => {
                let neurons = oracle.list_neurons(self.view, block).await?;
                let bytes = encode(kind.tag(), &neurons)?;
                self.backend.put(kind, block, bytes).await?;
            }
            DatumKind::SubnetState => {
                let state = oracle.subnet_state(self.view, block).await?;
                let bytes = encode(kind.tag(), &state)?;
                self.backend.put(kind, block, bytes).await?;
            }
            DatumKind::BlockHash => {
                let hash = oracle.block_hash(self.view, block).await?;
                let bytes = encode(kind.tag(), &hash)?;
                self.backend.put(kind, block, bytes).await?;
            }
            DatumKind::BlockTimestamp => {
                let ts = oracle.block_timestamp(self.view, block).await?;
                let bytes = encode(kind.tag(), &ts)?;
                self.backend.put(kind, block, bytes).await?;
            }
        }
        Ok(())
    }

}

/// Mirrors [`ChainOracleApi`] with an extra `throw_on_cache_miss` flag
/// (spec.md §4.2). Implemented against a dedicated Oracle handle supplied
/// by the caller (not a worker's) so a miss can be backfilled inline.
#[async_trait]
pub trait PrefetchCacheApi: Send + Sync {
    async fn list_neurons(
        &self,
        oracle: &(dyn ChainOracleApi + Sync),
        block: BlockId,
        throw_on_cache_miss: bool,
    ) -> CacheResult<Vec<chain_oracle::Neuron>>;

    async fn subnet_state(
        &self,
        oracle: &(dyn ChainOracleApi + Sync),
        block: BlockId,
        throw_on_cache_miss: bool,
    ) -> CacheResult<chain_oracle::SubnetState>;

    async fn block_hash(
        &self,
        oracle: &(dyn ChainOracleApi + Sync),
        block: BlockId,
        throw_on_cache_miss: bool,
    ) -> CacheResult<String>;

    async fn block_timestamp(
        &self,
        oracle: &(dyn ChainOracleApi + Sync),
        block: BlockId,
        throw_on_cache_miss: bool,
    ) -> CacheResult<TimestampSeconds>;
}

#[async_trait]
impl<O: ChainOracleApi + 'static, B: CacheBackend + 'static> PrefetchCacheApi for PrefetchCache<O, B> {
    async fn list_neurons(
        &self,
        oracle: &(dyn ChainOracleApi + Sync),
        block: BlockId,
        throw_on_cache_miss: bool,
    ) -> CacheResult<Vec<chain_oracle::Neuron>> {
        self.note_requested(block);
        if let Some(bytes) = self.backend.get(DatumKind::Neurons, block).await? {
            return Ok(decode(DatumKind::Neurons.tag(), &bytes)?);
        }
        if throw_on_cache_miss {
            return Err(CacheError::Miss {
                kind: DatumKind::Neurons,
                block,
            });
        }
        let value = oracle.list_neurons(self.view, block).await?;
        let bytes = encode(DatumKind::Neurons.tag(), &value)?;
        self.backend.put(DatumKind::Neurons, block, bytes).await?;
        Ok(value)
    }

    async fn subnet_state(
        &self,
        oracle: &(dyn ChainOracleApi + Sync),
        block: BlockId,
        throw_on_cache_miss: bool,
    ) -> CacheResult<chain_oracle::SubnetState> {
        self.note_requested(block);
        if let Some(bytes) = self.backend.get(DatumKind::SubnetState, block).await? {
            return Ok(decode(DatumKind::SubnetState.tag(), &bytes)?);
        }
        if throw_on_cache_miss {
            return Err(CacheError::Miss {
                kind: DatumKind::SubnetState,
                block,
            });
        }
        let value = oracle.subnet_state(self.view, block).await?;
        let bytes = encode(DatumKind::SubnetState.tag(), &value)?;
        self.backend.put(DatumKind::SubnetState, block, bytes).await?;
        Ok(value)
    }

    async fn block_hash(
        &self,
        oracle: &(dyn ChainOracleApi + Sync),
        block: BlockId,
        throw_on_cache_miss: bool,
    ) -> CacheResult<String> {
        self.note_requested(block);
        if let Some(bytes) = self.backend.get(DatumKind::BlockHash, block).await? {
            return Ok(decode(DatumKind::BlockHash.tag(), &bytes)?);
        }
        if throw_on_cache_miss {
            return Err(CacheError::Miss {
                kind: DatumKind::BlockHash,
                block,
            });
        }
        let value = oracle.block_hash(self.view, block).await?;
        let bytes = encode(DatumKind::BlockHash.tag(), &value)?;
        self.backend.put(DatumKind::BlockHash, block, bytes).await?;
        Ok(value)
    }

    async fn block_timestamp(
        &self,
        oracle: &(dyn ChainOracleApi + Sync),
        block: BlockId,
        throw_on_cache_miss: bool,
    ) -> CacheResult<TimestampSeconds> {
        self.note_requested(block);
        if let Some(bytes) = self.backend.get(DatumKind::BlockTimestamp, block).await? {
            return Ok(decode(DatumKind::BlockTimestamp.tag(), &bytes)?);
        }
        if throw_on_cache_miss {
            return Err(CacheError::Miss {
                kind: DatumKind::BlockTimestamp,
                block,
            });
        }
        let value = oracle.block_timestamp(self.view, block).await?;
        let bytes = encode(DatumKind::BlockTimestamp.tag(), &value)?;
        self.backend
            .put(DatumKind::BlockTimestamp, block, bytes)
            .await?;
        Ok(value)
    }
}

impl<O: ChainOracleApi + 'static, B: CacheBackend + 'static> Drop for PrefetchCache<O, B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use async_trait::async_trait as at;
    use chain_oracle::{ChainOracleResult, MetagraphSnapshot, Neuron, SubnetState};
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone)]
    struct CountingOracle {
        fetches: Arc<AtomicUsize>,
    }

    #[at]
    impl ChainOracleApi for CountingOracle {
        async fn current_block(&self, _view: ChainView) -> ChainOracleResult<BlockId> {
            Ok(1_000_000)
        }

        async fn list_neurons(&self, _view: ChainView, _block: BlockId) -> ChainOracleResult<Vec<Neuron>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn subnet_state(&self, _view: ChainView, _block: BlockId) -> ChainOracleResult<SubnetState> {
            Ok(SubnetState { total_stake: vec![] })
        }

        async fn block_hash(&self, _view: ChainView, block: BlockId) -> ChainOracleResult<String> {
            Ok(format!("hash-{block}"))
        }

        async fn block_timestamp(&self, _view: ChainView, block: BlockId) -> ChainOracleResult<TimestampSeconds> {
            Ok(block as u64 * 12)
        }

        async fn shielded_neurons(&self, _view: ChainView) -> ChainOracleResult<Vec<Neuron>> {
            Ok(vec![])
        }

        async fn oldest_reachable_block(&self, _view: ChainView) -> ChainOracleResult<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn miss_with_throw_flag_errors_instead_of_fetching() {
        let backend = Arc::new(InMemoryBackend::new());
        let oracle = CountingOracle {
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        let cache = PrefetchCache::start(
            {
                let o = oracle.clone();
                move || o.clone()
            },
            backend,
            ChainView::Lite,
            0,
        );
        let result: CacheResult<Vec<Neuron>> = cache.list_neurons(&oracle, 5, true).await;
        assert!(matches!(result, Err(CacheError::Miss { .. })));
        cache.close();
    }

    #[tokio::test]
    async fn miss_without_throw_flag_falls_through_and_populates_cache() {
        let backend = Arc::new(InMemoryBackend::new());
        let fetches = Arc::new(AtomicUsize::new(0));
        let oracle = CountingOracle {
            fetches: fetches.clone(),
        };
        let cache = PrefetchCache::start(
            {
                let o = oracle.clone();
                move || o.clone()
            },
            backend,
            ChainView::Lite,
            0,
        );

        let first = cache.list_neurons(&oracle, 5, false).await.unwrap();
        assert_eq!(first, vec![]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Second read is served from the now-populated cache.
        let _second = cache.list_neurons(&oracle, 5, false).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        cache.close();
    }

    #[test]
    fn metagraph_snapshot_type_is_reexported() {
        let _ = std::mem::size_of::<MetagraphSnapshot>();
    }
}
