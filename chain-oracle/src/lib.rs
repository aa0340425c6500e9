pub mod archive_fallback;
pub mod error;
pub mod rpc;
pub mod types;

pub use archive_fallback::ArchiveFallbackOracle;
pub use error::{ChainOracleError, ChainOracleResult};
pub use types::{ChainView, MetagraphSnapshot, Neuron, SubnetState, Validator};

use async_trait::async_trait;
use compute_validator_common::ids::BlockId;
use compute_validator_common::time::TimestampSeconds;

/// Typed read API over a block-addressed chain source (spec.md §4.1). Every
/// operation is idempotent and safe to retry.
#[async_trait]
pub trait ChainOracleApi: Send + Sync {
    /// `chain_head - 5`, to avoid acting on blocks that may still reorg.
    async fn current_block(&self, view: ChainView) -> ChainOracleResult<BlockId>;

    async fn list_neurons(&self, view: ChainView, block: BlockId) -> ChainOracleResult<Vec<Neuron>>;

    /// Derived: neurons with `stake >= 1000`.
    async fn list_validators(&self, view: ChainView, block: BlockId) -> ChainOracleResult<Vec<Validator>> {
        let neurons = self.list_neurons(view, block).await?;
        Ok(neurons
            .into_iter()
            .filter(|n| n.stake >= compute_validator_common::config::MINIMUM_VALIDATOR_STAKE)
            .map(Validator)
            .collect())
    }

    async fn subnet_state(&self, view: ChainView, block: BlockId) -> ChainOracleResult<SubnetState>;

    async fn block_hash(&self, view: ChainView, block: BlockId) -> ChainOracleResult<String>;

    async fn block_timestamp(&self, view: ChainView, block: BlockId) -> ChainOracleResult<TimestampSeconds>;

    /// Through the DDoS-shielded path; independent of block.
    async fn shielded_neurons(&self, view: ChainView) -> ChainOracleResult<Vec<Neuron>>;

    /// `-inf` if an archive source is configured; else `current - 200`.
    async fn oldest_reachable_block(&self, view: ChainView) -> ChainOracleResult<i64>;

    async fn metagraph_snapshot(
        &self,
        view: ChainView,
        block: BlockId,
    ) -> ChainOracleResult<MetagraphSnapshot> {
        let neurons = self.list_neurons(view, block).await?;
        let block_hash = self.block_hash(view, block).await?;
        let serving_hotkeys = neurons
            .iter()
            .filter(|n| n.is_serving())
            .map(|n| n.hotkey.clone())
            .collect();
        let uids = neurons.iter().map(|n| n.uid).collect();
        let hotkeys = neurons.iter().map(|n| n.hotkey.clone()).collect();
        let total_stake = neurons.iter().map(|n| n.stake).collect();
        Ok(MetagraphSnapshot {
            block,
            block_hash,
            uids,
            hotkeys,
            serving_hotkeys,
            total_stake,
        })
    }
}
