//! Status emission (spec.md §4.5): one update per state transition,
//! ordered and at-most-once.

use async_trait::async_trait;
use compute_validator_common::ids::JobUuid;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Received,
    Accepted,
    ExecutorReady,
    VolumesReady,
    Rejected,
    Failed,
    Completed,
}

/// Metadata carries the miner's last protocol message, stdout/stderr and
/// artifacts on completion, and a human comment (spec.md §4.5). We model
/// all of those as an open `serde_json::Value` map since their shape
/// varies by status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub job_uuid: JobUuid,
    pub status: Status,
    pub metadata: Value,
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn emit(&self, update: StatusUpdate);
}

/// Collects every emitted update in order; used by the `validator` binary
/// for tests and by anything that wants to assert emission ordering.
#[derive(Default)]
pub struct RecordingStatusSink {
    updates: tokio::sync::Mutex<Vec<StatusUpdate>>,
}

#[async_trait]
impl StatusSink for RecordingStatusSink {
    async fn emit(&self, update: StatusUpdate) {
        self.updates.lock().await.push(update);
    }
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().await.clone()
    }
}
