//! The job driver state machine (spec.md §4.5). `PENDING` is the only
//! initial state; `COMPLETED`, `EXCUSED`, `REJECTED` and `FAILED` are
//! terminal.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Sent,
    Accepted,
    Ready,
    Running,
    VolumesReady,
    Done,
    Completed,
    /// Decline{BUSY} backed by sufficient excuse receipts: not blacklisted.
    Excused,
    /// Decline for any other reason, or an insufficiently-excused BUSY.
    Rejected,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Excused | JobState::Rejected | JobState::Failed
        )
    }
}
