//! Abstracts the wire protocol to a single miner over the course of one
//! job, so [`crate::driver::JobDriver`] can be driven by a mock transport
//! in tests instead of a real connection (spec.md §4.5). The `validator`
//! binary backs this with the miner's WebSocket/HTTP job channel.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::JobDriverError;
use crate::event::MinerEvent;

#[async_trait]
pub trait MinerTransport: Send {
    /// `InitialJobRequest`: PENDING → SENT.
    async fn send_initial_request(&mut self) -> Result<(), JobDriverError>;

    /// The full job payload, sent once the executor is `READY`.
    async fn send_job_request(&mut self) -> Result<(), JobDriverError>;

    /// Waits up to `timeout` for the next protocol message. `Ok(None)`
    /// means the timeout elapsed with nothing received.
    async fn recv_event(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<MinerEvent>, JobDriverError>;
}
