//! Receipts: the authoritative economic log (spec.md §3). Miners persist
//! them; the validator only verifies, transfers and reconciles them against
//! allowance.

use serde::{Deserialize, Serialize};

use crate::ids::{ExecutorClass, Hotkey, JobUuid};
use crate::signing::{PublicKey, Signature};
use crate::time::TimestampSeconds;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStartedPayload {
    pub job_uuid: JobUuid,
    pub miner: Hotkey,
    pub validator: Hotkey,
    pub timestamp: TimestampSeconds,
    pub executor_class: ExecutorClass,
    pub max_timeout_seconds: u64,
    pub is_synthetic_job: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobAcceptedPayload {
    pub job_uuid: JobUuid,
    pub miner: Hotkey,
    pub validator: Hotkey,
    pub timestamp: TimestampSeconds,
    pub executor_class: ExecutorClass,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobFinishedPayload {
    pub job_uuid: JobUuid,
    pub miner: Hotkey,
    pub validator: Hotkey,
    pub timestamp: TimestampSeconds,
    pub executor_class: ExecutorClass,
    pub time_took_seconds: f64,
    pub score: f64,
}

/// An "excuse" receipt is any `JobStarted` receipt presented by a miner to
/// justify a `BUSY` decline (spec.md §4.4). It is a `JobStarted` receipt
/// signed by some *other* validator.
pub type ExcuseReceiptPayload = JobStartedPayload;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload_type")]
pub enum ReceiptPayload {
    JobStarted(JobStartedPayload),
    JobAccepted(JobAcceptedPayload),
    JobFinished(JobFinishedPayload),
}

impl ReceiptPayload {
    pub fn job_uuid(&self) -> JobUuid {
        match self {
            ReceiptPayload::JobStarted(p) => p.job_uuid,
            ReceiptPayload::JobAccepted(p) => p.job_uuid,
            ReceiptPayload::JobFinished(p) => p.job_uuid,
        }
    }

    pub fn miner(&self) -> &Hotkey {
        match self {
            ReceiptPayload::JobStarted(p) => &p.miner,
            ReceiptPayload::JobAccepted(p) => &p.miner,
            ReceiptPayload::JobFinished(p) => &p.miner,
        }
    }

    pub fn executor_class(&self) -> &ExecutorClass {
        match self {
            ReceiptPayload::JobStarted(p) => &p.executor_class,
            ReceiptPayload::JobAccepted(p) => &p.executor_class,
            ReceiptPayload::JobFinished(p) => &p.executor_class,
        }
    }

    pub fn timestamp(&self) -> TimestampSeconds {
        match self {
            ReceiptPayload::JobStarted(p) => p.timestamp,
            ReceiptPayload::JobAccepted(p) => p.timestamp,
            ReceiptPayload::JobFinished(p) => p.timestamp,
        }
    }

    /// A coarse discriminant usable as a dedup key component alongside
    /// `job_uuid` (spec.md §4.6: "deduplicate by (job_uuid, payload_type)").
    pub fn kind_tag(&self) -> &'static str {
        match self {
            ReceiptPayload::JobStarted(_) => "job_started",
            ReceiptPayload::JobAccepted(_) => "job_accepted",
            ReceiptPayload::JobFinished(_) => "job_finished",
        }
    }
}

/// A signed tuple `{payload, validator_sig, miner_sig}` (spec.md §3). Both
/// signatures cover the canonical JSON encoding of `payload`; `miner_sig` is
/// absent for payloads the validator itself emits before the miner has
/// countersigned (e.g. freshly-created `JobAcceptedReceipt`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub payload: ReceiptPayload,
    pub validator_sig: Signature,
    pub miner_sig: Option<Signature>,
}

impl Receipt {
    pub fn canonical_bytes(payload: &ReceiptPayload) -> Vec<u8> {
        serde_json::to_vec(payload).expect("receipt payload is always serializable")
    }

    pub fn verify_validator_signature(&self, validator_key: &PublicKey) -> bool {
        verify_with(&Self::canonical_bytes(&self.payload), &self.validator_sig, validator_key)
    }

    pub fn verify_miner_signature(&self, miner_key: &PublicKey) -> bool {
        match &self.miner_sig {
            Some(sig) => verify_with(&Self::canonical_bytes(&self.payload), sig, miner_key),
            None => false,
        }
    }
}

/// Verification is stateless (Ed25519), so we don't need a full oracle
/// instance to check a third-party signature; this avoids generating a
/// throwaway keypair just to call `verify`.
fn verify_with(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
    let Ok(vk) = VerifyingKey::from_bytes(public_key.as_bytes()) else {
        return false;
    };
    let sig = DalekSignature::from_bytes(signature.as_bytes());
    vk.verify(message, &sig).is_ok()
}
