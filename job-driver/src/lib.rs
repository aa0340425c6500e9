pub mod driver;
pub mod error;
pub mod event;
pub mod state;
pub mod status;
pub mod transport;

pub use driver::{JobDriver, JobOutcome};
pub use error::{FailureReason, JobDriverError};
pub use event::{DeclineReason, MinerEvent};
pub use state::JobState;
pub use status::{Status, StatusSink, StatusUpdate};
pub use transport::MinerTransport;
