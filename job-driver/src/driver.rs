//! Drives a single organic job through the state machine in spec.md §4.5,
//! emitting exactly one status update per transition and signing receipts
//! at the acceptance, executor-ready and completion boundaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use compute_validator_common::ids::{ExecutorClass, Hotkey, JobUuid};
use compute_validator_common::receipts::{
    JobAcceptedPayload, JobFinishedPayload, JobStartedPayload, Receipt, ReceiptPayload,
};
use compute_validator_common::signing::SigningOracle;
use compute_validator_common::time::TimestampSeconds;
use log::{info, warn};
use router::excuse::{excuses_justify_busy_decline, ValidatorStakeLookup};
use router::BlacklistStore;
use serde_json::json;

use allowance::{AllowanceLedger, ReservationId};

use crate::error::{FailureReason, JobDriverError};
use crate::event::{DeclineReason, MinerEvent};
use crate::state::JobState;
use crate::status::{Status, StatusSink, StatusUpdate};
use crate::transport::MinerTransport;

#[derive(Clone, Copy, Debug)]
pub struct JobTimeouts {
    pub initial_response: Duration,
    pub executor_ready: Duration,
    pub total_job: Duration,
}

pub struct JobDriver {
    pub job_uuid: JobUuid,
    pub miner: Hotkey,
    pub validator: Hotkey,
    pub executor_class: ExecutorClass,
    pub is_synthetic_job: bool,
    pub signing_oracle: Arc<dyn SigningOracle>,
    pub ledger: Arc<AllowanceLedger>,
    pub reservation_id: ReservationId,
    pub timeouts: JobTimeouts,
    /// The miner's declared `online_count` for this executor class (spec.md
    /// §4.4): a BUSY decline must be excused once per slot.
    pub online_count: u32,
    pub minimum_validator_stake_for_excuse: f64,
    /// When this job was dispatched to the miner; excuse receipts dated
    /// after this do not count (spec.md §4.4).
    pub job_request_time: TimestampSeconds,
    pub blacklist: Arc<dyn BlacklistStore>,
    pub blacklist_ttl: Duration,
    pub validator_stakes: Arc<dyn ValidatorStakeLookup>,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub final_state: JobState,
    pub failure_reason: Option<FailureReason>,
    pub receipts: Vec<Receipt>,
}

impl JobDriver {
    /// Runs the state machine to completion against `transport`, emitting
    /// status updates to `status_sink`. Never returns `Err`: every failure
    /// mode is folded into a terminal `JobState` plus `FailureReason` so the
    /// caller (the router, for BUSY/excuse handling) always gets a typed
    /// outcome instead of having to distinguish "driver bug" from "job
    /// failed".
    pub async fn drive(
        mut self,
        transport: &mut dyn MinerTransport,
        status_sink: &dyn StatusSink,
    ) -> JobOutcome {
        match tokio::time::timeout(self.timeouts.total_job, self.run(transport, status_sink)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "job {} exceeded total_job_timeout of {:?}",
                    self.job_uuid, self.timeouts.total_job
                );
                self.terminal(
                    status_sink,
                    JobState::Failed,
                    Some(FailureReason::FinalResponseTimedOut),
                    vec![],
                    "total job timeout exceeded",
                )
                .await
            }
        }
    }

    async fn run(&mut self, transport: &mut dyn MinerTransport, status_sink: &dyn StatusSink) -> JobOutcome {
        let mut receipts = Vec::new();

        if let Err(err) = transport.send_initial_request().await {
            return self
                .terminal(
                    status_sink,
                    JobState::Failed,
                    Some(err.failure_reason()),
                    receipts,
                    &err.to_string(),
                )
                .await;
        }
        self.emit(status_sink, Status::Received, json!({})).await;

        // SENT -> ACCEPTED
        let event = match transport.recv_event(self.timeouts.initial_response).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(FailureReason::InitialResponseTimedOut),
                        receipts,
                        "miner did not respond to the initial job request in time",
                    )
                    .await
            }
            Err(err) => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(err.failure_reason()),
                        receipts,
                        &err.to_string(),
                    )
                    .await
            }
        };

        match event {
            MinerEvent::Accept => {}
            MinerEvent::Decline { reason, excuses } => {
                let (state, comment) = match reason {
                    DeclineReason::Busy => {
                        let justified = self.excuses_justify_decline(&excuses).await;
                        if justified {
                            (JobState::Excused, "Miner properly excused BUSY decline with receipts".to_string())
                        } else {
                            self.blacklist
                                .blacklist(
                                    &self.miner,
                                    "declined BUSY without sufficient excuse receipts".to_string(),
                                    self.blacklist_ttl,
                                )
                                .await;
                            (
                                JobState::Rejected,
                                "Miner failed to excuse BUSY decline, blacklisted".to_string(),
                            )
                        }
                    }
                    DeclineReason::Other(reason) => (JobState::Rejected, format!("declined: {reason}")),
                };
                return self
                    .terminal(
                        status_sink,
                        state,
                        Some(FailureReason::JobDeclined),
                        receipts,
                        &comment,
                    )
                    .await;
            }
            other => return self.unexpected_event(status_sink, other, receipts).await,
        }

        let accepted_receipt = self.sign_job_accepted();
        receipts.push(accepted_receipt);
        self.emit(status_sink, Status::Accepted, json!({})).await;

        // ACCEPTED -> READY
        let event = match transport.recv_event(self.timeouts.executor_ready).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(FailureReason::ExecutorReadinessResponseTimedOut),
                        receipts,
                        "executor did not become ready in time",
                    )
                    .await
            }
            Err(err) => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(err.failure_reason()),
                        receipts,
                        &err.to_string(),
                    )
                    .await
            }
        };
        match event {
            MinerEvent::ExecutorReady => {}
            MinerEvent::ExecutorFailed { message } => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(FailureReason::ExecutorFailed),
                        receipts,
                        &message,
                    )
                    .await
            }
            other => return self.unexpected_event(status_sink, other, receipts).await,
        }

        let started_receipt = self.sign_job_started();
        if let Err(err) = self
            .ledger
            .spend(
                &self.miner,
                &self.executor_class,
                self.reservation_id,
                &started_receipt,
                &self.signing_oracle.public_key(),
            )
            .await
        {
            return self
                .terminal(
                    status_sink,
                    JobState::Failed,
                    Some(FailureReason::AllowanceSpendFailed),
                    receipts,
                    &format!("allowance spend failed: {err}"),
                )
                .await;
        }
        receipts.push(started_receipt);
        self.emit(status_sink, Status::ExecutorReady, json!({})).await;

        if let Err(err) = transport.send_job_request().await {
            return self
                .terminal(
                    status_sink,
                    JobState::Failed,
                    Some(err.failure_reason()),
                    receipts,
                    &err.to_string(),
                )
                .await;
        }

        // RUNNING -> VOLUMES_READY (also bounded by executor_ready_timeout
        // for the streaming variant, spec.md §4.5).
        let event = match transport.recv_event(self.timeouts.executor_ready).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(FailureReason::StreamingJobReadyTimedOut),
                        receipts,
                        "volumes did not become ready in time",
                    )
                    .await
            }
            Err(err) => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(err.failure_reason()),
                        receipts,
                        &err.to_string(),
                    )
                    .await
            }
        };
        match event {
            MinerEvent::VolumesReady => {}
            other => return self.unexpected_event(status_sink, other, receipts).await,
        }
        self.emit(status_sink, Status::VolumesReady, json!({})).await;

        // VOLUMES_READY -> DONE -> COMPLETED
        let event = match transport.recv_event(self.timeouts.executor_ready).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(FailureReason::FinalResponseTimedOut),
                        receipts,
                        "miner did not report a final result in time",
                    )
                    .await
            }
            Err(err) => {
                return self
                    .terminal(
                        status_sink,
                        JobState::Failed,
                        Some(err.failure_reason()),
                        receipts,
                        &err.to_string(),
                    )
                    .await
            }
        };
        match event {
            MinerEvent::ExecutionDone {
                stdout,
                stderr,
                artifacts,
            } => {
                let finished_receipt = self.sign_job_finished();
                receipts.push(finished_receipt);
                self.terminal(
                    status_sink,
                    JobState::Completed,
                    None,
                    receipts,
                    &json!({ "stdout": stdout, "stderr": stderr, "artifacts": artifacts }).to_string(),
                )
                .await
            }
            MinerEvent::JobFailed { message, huggingface_download } => {
                let reason = if huggingface_download {
                    FailureReason::HuggingfaceDownload
                } else {
                    FailureReason::JobFailed
                };
                self.terminal(status_sink, JobState::Failed, Some(reason), receipts, &message)
                    .await
            }
            other => self.unexpected_event(status_sink, other, receipts).await,
        }
    }

    /// Resolves the stake of every distinct validator behind `excuses` once
    /// each, then applies the excuse policy (spec.md §4.4). Stake lookups
    /// are async (they read a metagraph snapshot); `excuses_justify_busy_decline`
    /// itself stays synchronous, so the lookups are done up front into a map.
    async fn excuses_justify_decline(&self, excuses: &[Receipt]) -> bool {
        let mut stakes: HashMap<Hotkey, Option<f64>> = HashMap::new();
        for receipt in excuses {
            if let ReceiptPayload::JobStarted(payload) = &receipt.payload {
                if !stakes.contains_key(&payload.validator) {
                    let stake = self.validator_stakes.stake_of(&payload.validator).await;
                    stakes.insert(payload.validator.clone(), stake);
                }
            }
        }

        excuses_justify_busy_decline(
            excuses,
            &self.miner,
            &self.executor_class,
            self.online_count,
            self.job_request_time,
            self.minimum_validator_stake_for_excuse,
            |validator| stakes.get(validator).copied().flatten(),
        )
    }

    async fn unexpected_event(
        &mut self,
        status_sink: &dyn StatusSink,
        event: MinerEvent,
        receipts: Vec<Receipt>,
    ) -> JobOutcome {
        self.terminal(
            status_sink,
            JobState::Failed,
            Some(FailureReason::JobFailed),
            receipts,
            &format!("unexpected protocol message: {event:?}"),
        )
        .await
    }

    async fn terminal(
        &mut self,
        status_sink: &dyn StatusSink,
        state: JobState,
        failure_reason: Option<FailureReason>,
        receipts: Vec<Receipt>,
        comment: &str,
    ) -> JobOutcome {
        if state != JobState::Completed {
            // Terminal reservations that never reached executor-ready must
            // release their allowance hold rather than leak it (I3 backstop;
            // the natural TTL expiry in allowance::ledger is the fallback).
            if let Err(err) = self
                .ledger
                .undo(&self.miner, &self.executor_class, self.reservation_id)
                .await
            {
                warn!("releasing reservation for job {} failed: {err}", self.job_uuid);
            }
        }

        let status = match state {
            JobState::Completed => Status::Completed,
            JobState::Excused | JobState::Rejected => Status::Rejected,
            _ => Status::Failed,
        };
        self.emit(status_sink, status, json!({ "comment": comment })).await;
        info!("job {} reached terminal state {:?}", self.job_uuid, state);

        JobOutcome {
            final_state: state,
            failure_reason,
            receipts,
        }
    }

    async fn emit(&self, status_sink: &dyn StatusSink, status: Status, metadata: serde_json::Value) {
        status_sink
            .emit(StatusUpdate {
                job_uuid: self.job_uuid,
                status,
                metadata,
            })
            .await;
    }

    fn sign_job_accepted(&self) -> Receipt {
        let payload = ReceiptPayload::JobAccepted(JobAcceptedPayload {
            job_uuid: self.job_uuid,
            miner: self.miner.clone(),
            validator: self.validator.clone(),
            timestamp: compute_validator_common::time::get_current_time_in_seconds(),
            executor_class: self.executor_class.clone(),
        });
        self.sign(payload)
    }

    fn sign_job_started(&self) -> Receipt {
        let payload = ReceiptPayload::JobStarted(JobStartedPayload {
            job_uuid: self.job_uuid,
            miner: self.miner.clone(),
            validator: self.validator.clone(),
            timestamp: compute_validator_common::time::get_current_time_in_seconds(),
            executor_class: self.executor_class.clone(),
            max_timeout_seconds: self.timeouts.total_job.as_secs(),
            is_synthetic_job: self.is_synthetic_job,
        });
        self.sign(payload)
    }

    fn sign_job_finished(&self) -> Receipt {
        let payload = ReceiptPayload::JobFinished(JobFinishedPayload {
            job_uuid: self.job_uuid,
            miner: self.miner.clone(),
            validator: self.validator.clone(),
            timestamp: compute_validator_common::time::get_current_time_in_seconds(),
            executor_class: self.executor_class.clone(),
            time_took_seconds: 0.0,
            score: 0.0,
        });
        self.sign(payload)
    }

    fn sign(&self, payload: ReceiptPayload) -> Receipt {
        let bytes = Receipt::canonical_bytes(&payload);
        let validator_sig = self.signing_oracle.sign(&bytes);
        Receipt {
            payload,
            validator_sig,
            miner_sig: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::RecordingStatusSink;
    use async_trait::async_trait;
    use compute_validator_common::signing::Ed25519SigningOracle;
    use router::{FixedStakeLookup, InMemoryBlacklist};
    use std::collections::VecDeque;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedTransport {
        events: AsyncMutex<VecDeque<Option<MinerEvent>>>,
        sent_initial: AsyncMutex<bool>,
        sent_job_request: AsyncMutex<bool>,
    }

    impl ScriptedTransport {
        fn new(events: Vec<MinerEvent>) -> Self {
            Self {
                events: AsyncMutex::new(events.into_iter().map(Some).collect()),
                sent_initial: AsyncMutex::new(false),
                sent_job_request: AsyncMutex::new(false),
            }
        }
    }

    #[async_trait]
    impl MinerTransport for ScriptedTransport {
        async fn send_initial_request(&mut self) -> Result<(), JobDriverError> {
            *self.sent_initial.lock().await = true;
            Ok(())
        }

        async fn send_job_request(&mut self) -> Result<(), JobDriverError> {
            *self.sent_job_request.lock().await = true;
            Ok(())
        }

        async fn recv_event(
            &mut self,
            _timeout: Duration,
        ) -> Result<Option<MinerEvent>, JobDriverError> {
            Ok(self.events.lock().await.pop_front().flatten())
        }
    }

    async fn ledger_with_reservation() -> (Arc<AllowanceLedger>, ReservationId, Hotkey, ExecutorClass) {
        let miner: Hotkey = "m1".into();
        let class: ExecutorClass = "a6000".into();
        let ledger = Arc::new(AllowanceLedger::new(1000));
        ledger
            .credit(&[allowance::types::AllowanceCell {
                miner: miner.clone(),
                executor_class: class.clone(),
                block: 1,
                earned_seconds: 100.0,
            }])
            .await;
        let reservation_id = ledger.reserve(&miner, &class, 10.0).await.unwrap();
        (ledger, reservation_id, miner, class)
    }

    fn timeouts() -> JobTimeouts {
        JobTimeouts {
            initial_response: Duration::from_millis(50),
            executor_ready: Duration::from_millis(50),
            total_job: Duration::from_secs(5),
        }
    }

    async fn driver(ledger: Arc<AllowanceLedger>, reservation_id: ReservationId, miner: Hotkey, class: ExecutorClass) -> JobDriver {
        JobDriver {
            job_uuid: JobUuid::new_v4(),
            miner,
            validator: "validator-hotkey".into(),
            executor_class: class,
            is_synthetic_job: false,
            signing_oracle: Arc::new(Ed25519SigningOracle::generate()),
            ledger,
            reservation_id,
            timeouts: timeouts(),
            online_count: 1,
            minimum_validator_stake_for_excuse: 1000.0,
            job_request_time: 1_000,
            blacklist: Arc::new(InMemoryBlacklist::new()),
            blacklist_ttl: Duration::from_secs(60),
            validator_stakes: Arc::new(FixedStakeLookup::default()),
        }
    }

    #[tokio::test]
    async fn happy_path_reaches_completed_and_emits_three_receipts() {
        let (ledger, reservation_id, miner, class) = ledger_with_reservation().await;
        let driver = driver(ledger, reservation_id, miner, class).await;
        let mut transport = ScriptedTransport::new(vec![
            MinerEvent::Accept,
            MinerEvent::ExecutorReady,
            MinerEvent::VolumesReady,
            MinerEvent::ExecutionDone {
                stdout: "ok".into(),
                stderr: "".into(),
                artifacts: json!({}),
            },
        ]);
        let sink = RecordingStatusSink::new();
        let outcome = driver.drive(&mut transport, &sink).await;

        assert_eq!(outcome.final_state, JobState::Completed);
        assert_eq!(outcome.receipts.len(), 3);
        let updates = sink.updates().await;
        let statuses: Vec<Status> = updates.iter().map(|u| u.status).collect();
        assert_eq!(
            statuses,
            vec![
                Status::Received,
                Status::Accepted,
                Status::ExecutorReady,
                Status::VolumesReady,
                Status::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn initial_response_timeout_fails_the_job_and_releases_the_reservation() {
        let (ledger, reservation_id, miner, class) = ledger_with_reservation().await;
        let driver = driver(ledger.clone(), reservation_id, miner.clone(), class.clone()).await;
        let mut transport = ScriptedTransport::new(vec![]);
        let sink = RecordingStatusSink::new();
        let outcome = driver.drive(&mut transport, &sink).await;

        assert_eq!(outcome.final_state, JobState::Failed);
        assert_eq!(outcome.failure_reason, Some(FailureReason::InitialResponseTimedOut));
        assert_eq!(ledger.available(&miner, &class).await, 100.0);
    }

    #[tokio::test]
    async fn decline_busy_without_excuses_is_rejected_not_excused() {
        let (ledger, reservation_id, miner, class) = ledger_with_reservation().await;
        let driver = driver(ledger, reservation_id, miner, class).await;
        let mut transport = ScriptedTransport::new(vec![MinerEvent::Decline {
            reason: DeclineReason::Busy,
            excuses: vec![],
        }]);
        let sink = RecordingStatusSink::new();
        let outcome = driver.drive(&mut transport, &sink).await;
        assert_eq!(outcome.final_state, JobState::Rejected);
    }

    #[tokio::test]
    async fn decline_busy_with_excuses_is_excused() {
        let (ledger, reservation_id, miner, class) = ledger_with_reservation().await;
        let mut driver = driver(ledger, reservation_id, miner.clone(), class.clone()).await;
        driver.validator_stakes = Arc::new(FixedStakeLookup {
            stakes: std::collections::HashMap::from([("other-validator".into(), 2000.0)]),
        });
        let excuse_oracle = Ed25519SigningOracle::generate();
        let excuse_payload = ReceiptPayload::JobStarted(JobStartedPayload {
            job_uuid: JobUuid::new_v4(),
            miner,
            validator: "other-validator".into(),
            timestamp: 1,
            executor_class: class,
            max_timeout_seconds: 300,
            is_synthetic_job: false,
        });
        let sig = excuse_oracle.sign(&Receipt::canonical_bytes(&excuse_payload));
        let excuse = Receipt {
            payload: excuse_payload,
            validator_sig: sig,
            miner_sig: None,
        };
        let mut transport = ScriptedTransport::new(vec![MinerEvent::Decline {
            reason: DeclineReason::Busy,
            excuses: vec![excuse],
        }]);
        let sink = RecordingStatusSink::new();
        let outcome = driver.drive(&mut transport, &sink).await;
        assert_eq!(outcome.final_state, JobState::Excused);
    }

    #[tokio::test]
    async fn decline_busy_without_justified_excuses_blacklists_the_miner() {
        let (ledger, reservation_id, miner, class) = ledger_with_reservation().await;
        let driver = driver(ledger, reservation_id, miner.clone(), class.clone()).await;
        let blacklist = driver.blacklist.clone();
        let mut transport = ScriptedTransport::new(vec![MinerEvent::Decline {
            reason: DeclineReason::Busy,
            excuses: vec![],
        }]);
        let sink = RecordingStatusSink::new();
        let outcome = driver.drive(&mut transport, &sink).await;
        assert_eq!(outcome.final_state, JobState::Rejected);
        assert!(blacklist.is_blacklisted(&miner).await);
    }

    #[tokio::test]
    async fn executor_failed_fails_the_job() {
        let (ledger, reservation_id, miner, class) = ledger_with_reservation().await;
        let driver = driver(ledger, reservation_id, miner, class).await;
        let mut transport = ScriptedTransport::new(vec![
            MinerEvent::Accept,
            MinerEvent::ExecutorFailed {
                message: "nvidia-smi failed".into(),
            },
        ]);
        let sink = RecordingStatusSink::new();
        let outcome = driver.drive(&mut transport, &sink).await;
        assert_eq!(outcome.final_state, JobState::Failed);
        assert_eq!(outcome.failure_reason, Some(FailureReason::ExecutorFailed));
    }

    #[tokio::test]
    async fn huggingface_download_failure_is_classified_distinctly() {
        let (ledger, reservation_id, miner, class) = ledger_with_reservation().await;
        let driver = driver(ledger, reservation_id, miner, class).await;
        let mut transport = ScriptedTransport::new(vec![
            MinerEvent::Accept,
            MinerEvent::ExecutorReady,
            MinerEvent::VolumesReady,
            MinerEvent::JobFailed {
                message: "model download failed".into(),
                huggingface_download: true,
            },
        ]);
        let sink = RecordingStatusSink::new();
        let outcome = driver.drive(&mut transport, &sink).await;
        assert_eq!(outcome.final_state, JobState::Failed);
        assert_eq!(outcome.failure_reason, Some(FailureReason::HuggingfaceDownload));
    }
}
