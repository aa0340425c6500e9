//! The set of miners to transfer receipts from. Decoupled from the router
//! crate's [`allowance`]-aware `MinerDirectory` (C4): receipt transfer
//! needs every known miner, not just those with capacity for a given
//! executor class.

use async_trait::async_trait;
use compute_validator_common::ids::Hotkey;

#[async_trait]
pub trait MinerRegistry: Send + Sync {
    async fn all_miners(&self) -> Vec<Hotkey>;
}

pub struct FixedMinerRegistry(pub Vec<Hotkey>);

#[async_trait]
impl MinerRegistry for FixedMinerRegistry {
    async fn all_miners(&self) -> Vec<Hotkey> {
        self.0.clone()
    }
}
