//! Protocol messages a miner can send back over the course of a job
//! (spec.md §4.5). `MinerTransport::recv_event` surfaces these.

use compute_validator_common::receipts::Receipt;

#[derive(Clone, Debug)]
pub enum DeclineReason {
    Busy,
    Other(String),
}

#[derive(Clone, Debug)]
pub enum MinerEvent {
    Accept,
    /// `excuses` are only meaningful when `reason` is `Busy`.
    Decline {
        reason: DeclineReason,
        excuses: Vec<Receipt>,
    },
    ExecutorReady,
    VolumesReady,
    ExecutionDone {
        stdout: String,
        stderr: String,
        artifacts: serde_json::Value,
    },
    ExecutorFailed {
        message: String,
    },
    JobFailed {
        message: String,
        huggingface_download: bool,
    },
}
