//! Wraps a `ChainOracleApi` so that `UnknownBlock` failures against the
//! lite view transparently retry against the archive view when one is
//! configured (spec.md §4.1's failure model; design note in spec.md §9,
//! "Context-like per-task state").

use async_trait::async_trait;
use log::debug;

use compute_validator_common::ids::BlockId;
use compute_validator_common::time::TimestampSeconds;

use crate::error::{ChainOracleError, ChainOracleResult};
use crate::types::{ChainView, MetagraphSnapshot, Neuron, SubnetState};
use crate::ChainOracleApi;

pub struct ArchiveFallbackOracle<O: ChainOracleApi> {
    inner: O,
}

impl<O: ChainOracleApi> ArchiveFallbackOracle<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }

    async fn with_fallback<T, F, Fut>(&self, block: BlockId, f: F) -> ChainOracleResult<T>
    where
        F: Fn(ChainView) -> Fut,
        Fut: std::future::Future<Output = ChainOracleResult<T>>,
    {
        match f(ChainView::Lite).await {
            Err(ChainOracleError::UnknownBlock(_)) => {
                debug!("block {block} pruned on lite source, retrying on archive");
                match f(ChainView::Archive).await {
                    Err(ChainOracleError::UnknownBlock(b)) => {
                        Err(ChainOracleError::UnknownBlockOnArchive(b))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

#[async_trait]
impl<O: ChainOracleApi> ChainOracleApi for ArchiveFallbackOracle<O> {
    async fn current_block(&self, view: ChainView) -> ChainOracleResult<BlockId> {
        self.inner.current_block(view).await
    }

    async fn list_neurons(&self, _view: ChainView, block: BlockId) -> ChainOracleResult<Vec<Neuron>> {
        self.with_fallback(block, |view| self.inner.list_neurons(view, block))
            .await
    }

    async fn subnet_state(&self, _view: ChainView, block: BlockId) -> ChainOracleResult<SubnetState> {
        self.with_fallback(block, |view| self.inner.subnet_state(view, block))
            .await
    }

    async fn block_hash(&self, _view: ChainView, block: BlockId) -> ChainOracleResult<String> {
        self.with_fallback(block, |view| self.inner.block_hash(view, block))
            .await
    }

    async fn block_timestamp(
        &self,
        _view: ChainView,
        block: BlockId,
    ) -> ChainOracleResult<TimestampSeconds> {
        self.with_fallback(block, |view| self.inner.block_timestamp(view, block))
            .await
    }

    async fn shielded_neurons(&self, view: ChainView) -> ChainOracleResult<Vec<Neuron>> {
        self.inner.shielded_neurons(view).await
    }

    async fn oldest_reachable_block(&self, view: ChainView) -> ChainOracleResult<i64> {
        self.inner.oldest_reachable_block(view).await
    }

    async fn metagraph_snapshot(
        &self,
        _view: ChainView,
        block: BlockId,
    ) -> ChainOracleResult<MetagraphSnapshot> {
        self.with_fallback(block, |view| self.inner.metagraph_snapshot(view, block))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyOracle {
        lite_calls: Arc<AtomicUsize>,
        archive_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChainOracleApi for FlakyOracle {
        async fn current_block(&self, _view: ChainView) -> ChainOracleResult<BlockId> {
            Ok(1000)
        }

        async fn list_neurons(&self, view: ChainView, block: BlockId) -> ChainOracleResult<Vec<Neuron>> {
            match view {
                ChainView::Lite => {
                    self.lite_calls.fetch_add(1, Ordering::SeqCst);
                    Err(ChainOracleError::UnknownBlock(block))
                }
                ChainView::Archive => {
                    self.archive_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![])
                }
            }
        }

        async fn subnet_state(&self, _view: ChainView, _block: BlockId) -> ChainOracleResult<SubnetState> {
            Ok(SubnetState { total_stake: vec![] })
        }

        async fn block_hash(&self, _view: ChainView, _block: BlockId) -> ChainOracleResult<String> {
            Ok("0xhash".into())
        }

        async fn block_timestamp(
            &self,
            _view: ChainView,
            _block: BlockId,
        ) -> ChainOracleResult<TimestampSeconds> {
            Ok(0)
        }

        async fn shielded_neurons(&self, _view: ChainView) -> ChainOracleResult<Vec<Neuron>> {
            Ok(vec![])
        }

        async fn oldest_reachable_block(&self, _view: ChainView) -> ChainOracleResult<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn falls_back_to_archive_on_unknown_block() {
        let lite_calls = Arc::new(AtomicUsize::new(0));
        let archive_calls = Arc::new(AtomicUsize::new(0));
        let oracle = ArchiveFallbackOracle::new(FlakyOracle {
            lite_calls: lite_calls.clone(),
            archive_calls: archive_calls.clone(),
        });

        let result = oracle.list_neurons(ChainView::Lite, 42).await;
        assert!(result.is_ok());
        assert_eq!(lite_calls.load(Ordering::SeqCst), 1);
        assert_eq!(archive_calls.load(Ordering::SeqCst), 1);
    }

    struct AlwaysUnknownOracle;

    #[async_trait]
    impl ChainOracleApi for AlwaysUnknownOracle {
        async fn current_block(&self, _view: ChainView) -> ChainOracleResult<BlockId> {
            Ok(1000)
        }

        async fn list_neurons(&self, _view: ChainView, block: BlockId) -> ChainOracleResult<Vec<Neuron>> {
            Err(ChainOracleError::UnknownBlock(block))
        }

        async fn subnet_state(&self, _view: ChainView, _block: BlockId) -> ChainOracleResult<SubnetState> {
            Ok(SubnetState { total_stake: vec![] })
        }

        async fn block_hash(&self, _view: ChainView, _block: BlockId) -> ChainOracleResult<String> {
            Ok("0xhash".into())
        }

        async fn block_timestamp(
            &self,
            _view: ChainView,
            _block: BlockId,
        ) -> ChainOracleResult<TimestampSeconds> {
            Ok(0)
        }

        async fn shielded_neurons(&self, _view: ChainView) -> ChainOracleResult<Vec<Neuron>> {
            Ok(vec![])
        }

        async fn oldest_reachable_block(&self, _view: ChainView) -> ChainOracleResult<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn surfaces_unknown_block_on_archive_as_a_distinct_error() {
        let oracle = ArchiveFallbackOracle::new(AlwaysUnknownOracle);
        let result = oracle.list_neurons(ChainView::Lite, 7).await;
        assert!(matches!(result, Err(ChainOracleError::UnknownBlockOnArchive(7))));
    }
}
