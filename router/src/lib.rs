pub mod blacklist;
pub mod directory;
pub mod error;
pub mod excuse;
pub mod selector;

pub use blacklist::{BlacklistStore, InMemoryBlacklist};
pub use directory::MinerDirectory;
pub use error::{RouterError, RouterResult};
pub use excuse::{excuses_justify_busy_decline, FixedStakeLookup, ValidatorStakeLookup};
pub use selector::{JobRequest, JobTimeouts, MinerRouter, PickedMiner};
