//! Wires the router (C4), job driver (C5) and artifact I/O (C7) together
//! for a single organic job end to end, and adapts the driver's
//! [`StatusUpdate`]s onto the facilitator link's [`JobStatusUpdate`]s
//! (spec.md §4.4-§4.7). The miner-side wire protocol itself is an explicit
//! non-goal (spec.md §1): [`MinerTransportFactory`] is the seam a real
//! deployment backs with its websocket/HTTP job channel.

use std::sync::Arc;

use async_trait::async_trait;
use compute_validator_common::config::DynamicConfig;
use compute_validator_common::events::{SystemEvent, SystemEventSink, SystemEventType};
use compute_validator_common::ids::{Hotkey, JobUuid};
use compute_validator_common::signing::SigningOracle;
use dashmap::DashMap;
use log::{info, warn};
use metrics::counter;

use allowance::AllowanceLedger;
use artifacts::{OutputUploaderRegistry, VolumeDownloaderRegistry};
use job_driver::driver::JobTimeouts;
use job_driver::{JobDriver, JobOutcome, MinerTransport, Status, StatusSink, StatusUpdate};
use router::excuse::ValidatorStakeLookup;
use router::{BlacklistStore, JobRequest, MinerRouter, RouterError};

use crate::facilitator::{
    FacilitatorLink, JobCheated, JobStatusMetadata, JobStatusUpdate, MinerResponse, OrganicJobRequest,
};
use crate::metrics::names;

#[async_trait]
pub trait MinerTransportFactory: Send + Sync {
    async fn connect(&self, miner: &Hotkey, job_uuid: JobUuid) -> anyhow::Result<Box<dyn MinerTransport>>;
}

/// Stands in for a deployment's miner-side wire protocol client (spec.md §1
/// non-goal). Every connect attempt fails cleanly, so routing and allowance
/// accounting still run end to end against a real `MinerDirectory`/
/// `AllowanceLedger`; only the transport itself is unimplemented.
#[derive(Default)]
pub struct UnconfiguredTransportFactory;

#[async_trait]
impl MinerTransportFactory for UnconfiguredTransportFactory {
    async fn connect(&self, _miner: &Hotkey, _job_uuid: JobUuid) -> anyhow::Result<Box<dyn MinerTransport>> {
        anyhow::bail!("no miner transport configured for this deployment")
    }
}

pub struct OrganicJobService {
    pub validator_hotkey: Hotkey,
    pub router: Arc<MinerRouter>,
    pub ledger: Arc<AllowanceLedger>,
    pub signing_oracle: Arc<dyn SigningOracle>,
    pub transport_factory: Arc<dyn MinerTransportFactory>,
    pub volume_downloaders: Arc<VolumeDownloaderRegistry>,
    pub output_uploaders: Arc<OutputUploaderRegistry>,
    pub dynamic_config: Arc<dyn DynamicConfig>,
    pub facilitator: Arc<dyn FacilitatorLink>,
    pub system_events: Arc<dyn SystemEventSink>,
    pub blacklist: Arc<dyn BlacklistStore>,
    pub validator_stakes: Arc<dyn ValidatorStakeLookup>,
    /// Tracks which miner an in-flight job was sent to, so an out-of-band
    /// `JobCheated{uuid}` report (spec.md §4.5) can be turned into a
    /// blacklist decision without re-entering the job driver's state
    /// machine. Entries are removed once the job reaches a terminal state.
    job_miners: DashMap<JobUuid, Hotkey>,
}

impl OrganicJobService {
    pub fn new(
        validator_hotkey: Hotkey,
        router: Arc<MinerRouter>,
        ledger: Arc<AllowanceLedger>,
        signing_oracle: Arc<dyn SigningOracle>,
        transport_factory: Arc<dyn MinerTransportFactory>,
        volume_downloaders: Arc<VolumeDownloaderRegistry>,
        output_uploaders: Arc<OutputUploaderRegistry>,
        dynamic_config: Arc<dyn DynamicConfig>,
        facilitator: Arc<dyn FacilitatorLink>,
        system_events: Arc<dyn SystemEventSink>,
        blacklist: Arc<dyn BlacklistStore>,
        validator_stakes: Arc<dyn ValidatorStakeLookup>,
    ) -> Self {
        Self {
            validator_hotkey,
            router,
            ledger,
            signing_oracle,
            transport_factory,
            volume_downloaders,
            output_uploaders,
            dynamic_config,
            facilitator,
            system_events,
            blacklist,
            validator_stakes,
            job_miners: DashMap::new(),
        }
    }
}

/// Forwards every status update to the facilitator link, translating the
/// job driver's closed vocabulary into the open `metadata` shape spec.md
/// §6 describes.
struct FacilitatorStatusSink {
    facilitator: Arc<dyn FacilitatorLink>,
}

#[async_trait]
impl StatusSink for FacilitatorStatusSink {
    async fn emit(&self, update: StatusUpdate) {
        let status = match update.status {
            Status::Received => "received",
            Status::Accepted => "accepted",
            Status::ExecutorReady => "executor_ready",
            Status::VolumesReady => "volumes_ready",
            Status::Rejected => "rejected",
            Status::Failed => "failed",
            Status::Completed => "completed",
        };
        let comment = update
            .metadata
            .get("comment")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let miner_response = update.metadata.get("miner_response").and_then(|v| {
            serde_json::from_value::<MinerResponse>(v.clone()).ok()
        });
        self.facilitator
            .send_status(JobStatusUpdate {
                uuid: update.job_uuid,
                status: status.to_string(),
                metadata: JobStatusMetadata { comment, miner_response },
            })
            .await;
    }
}

impl OrganicJobService {
    /// Routes, drives and reconciles one organic job. Never panics: every
    /// failure mode (routing, transport, artifact I/O) ends in a
    /// `JobStatusUpdate` sent back to the facilitator, matching the job
    /// driver's own "never return Err" contract (spec.md §4.5).
    pub async fn handle(&self, request: OrganicJobRequest) {
        let timeouts = self.job_timeouts().await;
        let job_request = JobRequest {
            executor_class: request.executor_class.clone(),
            required_seconds: job_budget_seconds(&request, &timeouts),
            trusted: false,
        };

        let picked = match self.router.pick_miner(&job_request).await {
            Ok(picked) => picked,
            Err(err) => {
                self.reject(request.uuid, &err).await;
                return;
            }
        };

        counter!(names::JOBS_ROUTED_TOTAL).increment(1);
        self.job_miners.insert(request.uuid, picked.miner.clone());

        let scratch = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                warn!("failed to allocate scratch directory for job {}: {err}", request.uuid);
                self.system_events
                    .record(SystemEvent::new(
                        SystemEventType::Fatal,
                        "scratch_dir_allocation_failed",
                        err.to_string(),
                        serde_json::json!({"job_uuid": request.uuid}),
                    ))
                    .await;
                self.ledger
                    .undo(&picked.miner, &request.executor_class, picked.reservation_id)
                    .await;
                self.job_miners.remove(&request.uuid);
                return;
            }
        };

        if let Some(volume) = request.volume.clone() {
            let downloader = self.volume_downloaders.for_volume(volume);
            if let Err(err) = downloader.download(scratch.path()).await {
                warn!("input volume download failed for job {}: {err}", request.uuid);
                self.system_events
                    .record(SystemEvent::new(
                        SystemEventType::Transient,
                        "input_volume_download_failed",
                        err.to_string(),
                        serde_json::json!({"job_uuid": request.uuid, "miner": picked.miner.as_str()}),
                    ))
                    .await;
                self.ledger
                    .undo(&picked.miner, &request.executor_class, picked.reservation_id)
                    .await;
                self.job_miners.remove(&request.uuid);
                return;
            }
        }

        let mut transport = match self.transport_factory.connect(&picked.miner, request.uuid).await {
            Ok(transport) => transport,
            Err(err) => {
                warn!("failed to connect to miner {} for job {}: {err}", picked.miner, request.uuid);
                self.system_events
                    .record(SystemEvent::new(
                        SystemEventType::Protocol,
                        "miner_connection_failed",
                        err.to_string(),
                        serde_json::json!({"job_uuid": request.uuid, "miner": picked.miner.as_str()}),
                    ))
                    .await;
                self.ledger
                    .undo(&picked.miner, &request.executor_class, picked.reservation_id)
                    .await;
                self.job_miners.remove(&request.uuid);
                return;
            }
        };

        let options = self.dynamic_config.current().await;
        let driver = JobDriver {
            job_uuid: request.uuid,
            miner: picked.miner.clone(),
            validator: self.validator_hotkey.clone(),
            executor_class: request.executor_class.clone(),
            is_synthetic_job: false,
            signing_oracle: self.signing_oracle.clone(),
            ledger: self.ledger.clone(),
            reservation_id: picked.reservation_id,
            timeouts,
            online_count: picked.online_count,
            minimum_validator_stake_for_excuse: options.minimum_validator_stake_for_excuse,
            job_request_time: compute_validator_common::time::get_current_time_in_seconds(),
            blacklist: self.blacklist.clone(),
            blacklist_ttl: options.job_cheated_blacklist_ttl(),
            validator_stakes: self.validator_stakes.clone(),
        };

        let status_sink = FacilitatorStatusSink {
            facilitator: self.facilitator.clone(),
        };
        let outcome = driver.drive(transport.as_mut(), &status_sink).await;
        self.finish(request, outcome, scratch).await;
    }

    async fn finish(&self, request: OrganicJobRequest, outcome: JobOutcome, scratch: tempfile::TempDir) {
        self.job_miners.remove(&request.uuid);
        match outcome.final_state {
            job_driver::JobState::Completed => {
                counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
                if let Some(upload) = request.output_upload.clone() {
                    let uploader = self.output_uploaders.for_upload(upload);
                    if let Err(err) = uploader.upload(scratch.path()).await {
                        warn!("output upload failed for job {}: {err}", request.uuid);
                    }
                }
            }
            _ => {
                counter!(names::JOBS_FAILED_TOTAL).increment(1);
            }
        }
        info!(
            "job {} reached {:?} ({} receipts signed)",
            request.uuid,
            outcome.final_state,
            outcome.receipts.len()
        );
    }

    async fn reject(&self, uuid: JobUuid, err: &RouterError) {
        warn!("could not route job {uuid}: {err}");
        self.system_events
            .record(SystemEvent::new(
                SystemEventType::Policy,
                "job_routing_rejected",
                err.to_string(),
                serde_json::json!({"job_uuid": uuid}),
            ))
            .await;
        self.facilitator
            .send_status(JobStatusUpdate {
                uuid,
                status: "rejected".to_string(),
                metadata: JobStatusMetadata {
                    comment: err.to_string(),
                    miner_response: None,
                },
            })
            .await;
    }

    async fn job_timeouts(&self) -> JobTimeouts {
        let options = self.dynamic_config.current().await;
        JobTimeouts {
            initial_response: options.initial_response_timeout(),
            executor_ready: options.executor_ready_timeout(),
            total_job: options.total_job_timeout(),
        }
    }

    /// Handles an out-of-band `JobCheated` report (spec.md §4.5): blacklists
    /// the miner the job was routed to for `JOB_CHEATED_BLACKLIST_TIME_SECONDS`
    /// and audits the decision. Does not touch the job driver's state
    /// machine - by the time a report arrives the job has already reached a
    /// terminal state, and `job_miners` only remembers miners for in-flight
    /// jobs, so a report for an unknown uuid is just logged and dropped.
    pub async fn handle_cheated(&self, report: JobCheated) {
        let Some(miner) = self.job_miners.get(&report.uuid).map(|entry| entry.clone()) else {
            warn!(
                "JobCheated report for unknown or already-finished job {}",
                report.uuid
            );
            return;
        };

        let options = self.dynamic_config.current().await;
        self.blacklist
            .blacklist(
                &miner,
                format!("JobCheated report for job {}", report.uuid),
                options.job_cheated_blacklist_ttl(),
            )
            .await;
        self.system_events
            .record(SystemEvent::new(
                SystemEventType::Policy,
                "job_cheated_blacklist",
                format!("miner {miner} blacklisted for job {}", report.uuid),
                serde_json::json!({"job_uuid": report.uuid, "miner": miner.as_str()}),
            ))
            .await;
    }
}

/// Reserved allowance is seconds of wall-clock executor time; the
/// facilitator's `execution_time_limit` is the closest stated bound,
/// falling back to the dynamic total-job timeout when the request doesn't
/// supply one.
fn job_budget_seconds(request: &OrganicJobRequest, timeouts: &JobTimeouts) -> f64 {
    request
        .execution_time_limit
        .map(|seconds| seconds as f64)
        .unwrap_or(timeouts.total_job.as_secs_f64())
}
