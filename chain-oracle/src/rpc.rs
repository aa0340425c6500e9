//! JSON-RPC transport for the Chain Oracle. Speaks the substrate-style
//! methods (`chain_getBlockHash`, `chain_getHeader`, `state_call`) directly
//! over `jsonrpsee`, so it needs no generated runtime metadata: responses
//! come back as plain JSON and are decoded with `serde::Deserialize`
//! against the fixed shapes the subnet pallet exposes.

use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use log::{debug, warn};

use compute_validator_common::ids::BlockId;
use compute_validator_common::retry::{retry_with_backoff, BackoffPolicy};
use compute_validator_common::time::TimestampSeconds;

use crate::error::{ChainOracleError, ChainOracleResult};
use crate::types::{AxonEndpoint, ChainView, Neuron, SubnetState};
use crate::ChainOracleApi;

#[derive(Clone)]
pub struct ChainEndpoints {
    pub lite_url: String,
    pub archive_url: Option<String>,
}

/// Thin wrapper around two lazily-connected `jsonrpsee` websocket clients
/// (one per `ChainView`), each call wrapped in the shared bounded-backoff
/// retry policy (spec.md §4.1: "3 attempts, 0.1-0.8s").
pub struct JsonRpcChainOracle {
    endpoints: ChainEndpoints,
    request_timeout: Duration,
}

impl JsonRpcChainOracle {
    pub fn new(endpoints: ChainEndpoints) -> Self {
        Self {
            endpoints,
            request_timeout: Duration::from_secs(30),
        }
    }

    fn url_for(&self, view: ChainView) -> ChainOracleResult<&str> {
        match view {
            ChainView::Lite => Ok(self.endpoints.lite_url.as_str()),
            ChainView::Archive => self
                .endpoints
                .archive_url
                .as_deref()
                .ok_or(ChainOracleError::ArchiveNotConfigured),
        }
    }

    async fn connect(&self, view: ChainView) -> ChainOracleResult<WsClient> {
        let url = self.url_for(view)?;
        WsClientBuilder::default()
            .connection_timeout(self.request_timeout)
            .build(url)
            .await
            .map_err(|e| ChainOracleError::Transport(e.to_string()))
    }

    async fn call_with_retry<T, F, Fut>(&self, view: ChainView, f: F) -> ChainOracleResult<T>
    where
        F: Fn(WsClient) -> Fut,
        Fut: std::future::Future<Output = ChainOracleResult<T>>,
    {
        retry_with_backoff(
            BackoffPolicy::CHAIN_ORACLE,
            |e: &ChainOracleError| e.is_retryable(),
            || async {
                let client = self.connect(view).await?;
                tokio::time::timeout(self.request_timeout, f(client))
                    .await
                    .map_err(|_| ChainOracleError::Timeout(self.request_timeout))?
            },
        )
        .await
    }
}

#[async_trait]
impl ChainOracleApi for JsonRpcChainOracle {
    async fn current_block(&self, view: ChainView) -> ChainOracleResult<BlockId> {
        let head: u64 = self
            .call_with_retry(view, |client| async move {
                client
                    .request("chain_getHeight", rpc_params![])
                    .await
                    .map_err(|e| ChainOracleError::Transport(e.to_string()))
            })
            .await?;
        Ok(head.saturating_sub(5) as BlockId)
    }

    async fn list_neurons(&self, view: ChainView, block: BlockId) -> ChainOracleResult<Vec<Neuron>> {
        let raw: Vec<RawNeuron> = self
            .call_with_retry(view, |client| async move {
                client
                    .request("subnet_getNeurons", rpc_params![block])
                    .await
                    .map_err(|e| classify_rpc_error(e, block))
            })
            .await?;
        raw.into_iter().map(RawNeuron::into_neuron).collect()
    }

    async fn subnet_state(&self, view: ChainView, block: BlockId) -> ChainOracleResult<SubnetState> {
        let total_stake: Vec<f64> = self
            .call_with_retry(view, |client| async move {
                client
                    .request("subnet_getTotalStake", rpc_params![block])
                    .await
                    .map_err(|e| classify_rpc_error(e, block))
            })
            .await?;
        Ok(SubnetState { total_stake })
    }

    async fn block_hash(&self, view: ChainView, block: BlockId) -> ChainOracleResult<String> {
        self.call_with_retry(view, |client| async move {
            client
                .request("chain_getBlockHash", rpc_params![block])
                .await
                .map_err(|e| classify_rpc_error(e, block))
        })
        .await
    }

    async fn block_timestamp(
        &self,
        view: ChainView,
        block: BlockId,
    ) -> ChainOracleResult<TimestampSeconds> {
        self.call_with_retry(view, |client| async move {
            client
                .request("chain_getBlockTimestamp", rpc_params![block])
                .await
                .map_err(|e| classify_rpc_error(e, block))
        })
        .await
    }

    async fn shielded_neurons(&self, view: ChainView) -> ChainOracleResult<Vec<Neuron>> {
        let raw: Vec<RawNeuron> = self
            .call_with_retry(view, |client| async move {
                client
                    .request("subnet_getShieldedNeurons", rpc_params![])
                    .await
                    .map_err(|e| ChainOracleError::Transport(e.to_string()))
            })
            .await?;
        raw.into_iter().map(RawNeuron::into_neuron).collect()
    }

    async fn oldest_reachable_block(&self, view: ChainView) -> ChainOracleResult<i64> {
        if self.endpoints.archive_url.is_some() {
            debug!("archive source configured, oldest reachable block is unbounded");
            return Ok(i64::MIN);
        }
        let current = self.current_block(view).await?;
        Ok(current - compute_validator_common::config::LITE_LOOKBACK_BLOCKS)
    }
}

/// Maps a transport-level RPC failure that looks like "unknown block" into
/// the typed `UnknownBlock` error so `ArchiveFallbackOracle` can decide to
/// retry against the archive view.
fn classify_rpc_error(err: jsonrpsee::core::ClientError, block: BlockId) -> ChainOracleError {
    let msg = err.to_string();
    if msg.contains("unknown block") || msg.contains("State already discarded") {
        warn!("block {block} appears pruned on this source: {msg}");
        ChainOracleError::UnknownBlock(block)
    } else {
        ChainOracleError::Transport(msg)
    }
}

#[derive(serde::Deserialize)]
struct RawNeuron {
    uid: u16,
    hotkey: String,
    coldkey: String,
    axon_ip: Option<String>,
    axon_port: Option<u16>,
    stake: f64,
}

impl RawNeuron {
    fn into_neuron(self) -> ChainOracleResult<Neuron> {
        let axon = match (self.axon_ip, self.axon_port) {
            (Some(ip), Some(port)) if port != 0 => Some(AxonEndpoint { ip, port }),
            _ => None,
        };
        Ok(Neuron {
            uid: self.uid,
            hotkey: self.hotkey.into(),
            coldkey: self.coldkey.into(),
            axon,
            stake: self.stake,
        })
    }
}
