pub mod advisory_lock;
pub mod earning;
pub mod error;
pub mod ledger;
pub mod types;

pub use advisory_lock::{AdvisoryLock, InMemoryAdvisoryLock};
pub use error::{AllowanceError, AllowanceResult};
pub use ledger::AllowanceLedger;
pub use types::{Manifest, Reservation, ReservationId, ReservationState};
