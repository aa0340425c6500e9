use compute_validator_common::ids::ExecutorClass;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no executor for job request: no miner declares capacity for executor class {0}")]
    NoMinerForExecutorType(ExecutorClass),

    #[error("all miners for executor class {0} are busy")]
    AllMinersBusy(ExecutorClass),

    #[error(transparent)]
    Allowance(#[from] allowance::AllowanceError),
}

pub type RouterResult<T> = Result<T, RouterError>;
