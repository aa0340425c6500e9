use thiserror::Error;

/// 1:1 with the failure reasons propagated to status updates and audit
/// events (spec.md §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    MinerConnectionFailed,
    InitialResponseTimedOut,
    JobDeclined,
    ExecutorReadinessResponseTimedOut,
    StreamingJobReadyTimedOut,
    ExecutorFailed,
    FinalResponseTimedOut,
    JobFailed,
    HuggingfaceDownload,
    AllowanceSpendFailed,
}

#[derive(Error, Debug)]
pub enum JobDriverError {
    #[error("could not reach miner: {0}")]
    MinerConnectionFailed(String),

    #[error(transparent)]
    Allowance(#[from] allowance::AllowanceError),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl JobDriverError {
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            JobDriverError::MinerConnectionFailed(_) => FailureReason::MinerConnectionFailed,
            JobDriverError::Allowance(_) => FailureReason::JobFailed,
            JobDriverError::Signing(_) => FailureReason::JobFailed,
        }
    }
}
