use compute_validator_common::ids::{ExecutorClass, Hotkey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllowanceError {
    #[error("cannot reserve {required} executor-seconds for {miner}/{class}: only {available} available")]
    CannotReserveAllowance {
        miner: Hotkey,
        class: ExecutorClass,
        required: f64,
        available: f64,
    },

    #[error("reservation {0} not found")]
    ReservationNotFound(crate::types::ReservationId),

    #[error("reservation {0} was already spent")]
    ReservationAlreadySpent(crate::types::ReservationId),

    #[error("no miner has enough allowance for {class}: need {required}, best available {best_available} (unspent best {best_unspent})")]
    NotEnoughAllowance {
        class: ExecutorClass,
        required: f64,
        best_available: f64,
        best_unspent: f64,
    },

    #[error("allowance backfill is already running in another process")]
    Locked,

    #[error("JobStartedReceipt for {reservation} does not back this reservation: {reason}")]
    ReceiptDoesNotBackReservation {
        reservation: crate::types::ReservationId,
        reason: String,
    },
}

pub type AllowanceResult<T> = Result<T, AllowanceError>;
