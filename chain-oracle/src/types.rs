use compute_validator_common::ids::{BlockId, Hotkey};
use serde::{Deserialize, Serialize};

/// Which chain source to read through: the fast, frequently-pruned "lite"
/// node, or a full "archive" node that can answer any historical block.
/// Passed explicitly into every Oracle call (spec.md §9, "Context-like
/// per-task state") rather than carried implicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainView {
    Lite,
    Archive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxonEndpoint {
    pub ip: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    pub uid: u16,
    pub hotkey: Hotkey,
    pub coldkey: compute_validator_common::ids::Coldkey,
    pub axon: Option<AxonEndpoint>,
    pub stake: f64,
}

impl Neuron {
    pub fn is_serving(&self) -> bool {
        self.axon.is_some()
    }
}

/// Subset of neurons with `stake >= 1000` (spec.md §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Validator(pub Neuron);

impl Validator {
    pub fn hotkey(&self) -> &Hotkey {
        &self.0.hotkey
    }

    pub fn stake(&self) -> f64 {
        self.0.stake
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubnetState {
    pub total_stake: Vec<f64>,
}

/// Immutable once constructed; cacheable by block (spec.md §3, I4).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetagraphSnapshot {
    pub block: BlockId,
    pub block_hash: String,
    pub uids: Vec<u16>,
    pub hotkeys: Vec<Hotkey>,
    pub serving_hotkeys: Vec<Hotkey>,
    pub total_stake: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neuron_without_axon_is_not_serving() {
        let n = Neuron {
            uid: 1,
            hotkey: "hk".into(),
            coldkey: "ck".into(),
            axon: None,
            stake: 0.0,
        };
        assert!(!n.is_serving());
    }

    #[test]
    fn neuron_with_axon_is_serving() {
        let n = Neuron {
            uid: 1,
            hotkey: "hk".into(),
            coldkey: "ck".into(),
            axon: Some(AxonEndpoint {
                ip: "1.2.3.4".into(),
                port: 8091,
            }),
            stake: 0.0,
        };
        assert!(n.is_serving());
    }
}
