//! `SystemEvent`: the audit trail every `Fatal` and `Policy`-level failure
//! writes (spec.md §7: "Every failure path also writes a `SystemEvent` with
//! `{type, subtype, long_description, data}`").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemEventType {
    Fatal,
    Policy,
    Protocol,
    Transient,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub occurred_at: DateTime<Utc>,
    pub event_type: SystemEventType,
    pub event_subtype: String,
    pub long_description: String,
    pub data: Value,
}

impl SystemEvent {
    pub fn new(
        event_type: SystemEventType,
        event_subtype: impl Into<String>,
        long_description: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            occurred_at: Utc::now(),
            event_type,
            event_subtype: event_subtype.into(),
            long_description: long_description.into(),
            data,
        }
    }
}

/// Sink a `SystemEvent` can be written to; the `validator` binary backs this
/// with `sqlx`, tests back it with an in-memory `Vec`.
#[async_trait::async_trait]
pub trait SystemEventSink: Send + Sync {
    async fn record(&self, event: SystemEvent);
}
