//! The facilitator link (spec.md §6): a bidirectional message stream the
//! validator consumes organic job requests from and reports status back
//! over. The wire transport itself (the facilitator's websocket protocol)
//! is an explicit non-goal (spec.md §1); only the message shapes and the
//! trait seam the rest of the binary drives are built here.

use async_trait::async_trait;
use compute_validator_common::ids::{ExecutorClass, JobUuid};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use artifacts::{InputVolume, OutputUpload};

/// Inbound: a job the facilitator wants routed to a miner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrganicJobRequest {
    pub uuid: JobUuid,
    pub executor_class: ExecutorClass,
    pub docker_image: String,
    pub args: Vec<String>,
    pub env: std::collections::HashMap<String, String>,
    pub use_gpu: bool,
    pub volume: Option<InputVolume>,
    pub output_upload: Option<OutputUpload>,
    pub artifacts_dir: Option<String>,
    pub download_time_limit: Option<u64>,
    pub execution_time_limit: Option<u64>,
    pub upload_time_limit: Option<u64>,
}

/// Inbound, out-of-band: the facilitator's after-the-fact fraud report.
/// Must not re-enter the per-job state machine (spec.md §4.4's "Cheated-job
/// feedback"): it only drives a blacklist decision.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct JobCheated {
    pub uuid: JobUuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinerResponse {
    pub message_type: String,
    pub stdout: String,
    pub stderr: String,
    pub artifacts: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusMetadata {
    pub comment: String,
    pub miner_response: Option<MinerResponse>,
}

/// Outbound: one update per job-driver state transition (spec.md §4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub uuid: JobUuid,
    pub status: String,
    pub metadata: JobStatusMetadata,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum FacilitatorInbound {
    OrganicJobRequest(OrganicJobRequest),
    JobCheated(JobCheated),
}

/// The transport-agnostic seam: a real deployment backs this with a
/// websocket client reconnecting to the facilitator; tests back it with an
/// in-memory channel.
#[async_trait]
pub trait FacilitatorLink: Send + Sync {
    /// Blocks until the next inbound message, or `None` if the link closed.
    async fn recv(&mut self) -> Option<FacilitatorInbound>;

    async fn send_status(&self, update: JobStatusUpdate);
}

/// Stands in for a deployment's facilitator websocket client (spec.md §1
/// non-goal: the wire transport itself is out of scope). `recv` never
/// resolves, so a daemon wired against this never dispatches an organic
/// job; it exists so `run_daemon`'s dispatch loop has a concrete link to
/// drive until a deployment supplies a real one.
#[derive(Default)]
pub struct NullFacilitatorLink;

#[async_trait]
impl FacilitatorLink for NullFacilitatorLink {
    async fn recv(&mut self) -> Option<FacilitatorInbound> {
        std::future::pending().await
    }

    async fn send_status(&self, _update: JobStatusUpdate) {}
}
