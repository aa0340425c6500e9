use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReceiptTransferError {
    #[error("http request to miner failed: {0}")]
    Transport(String),

    #[error("request to miner timed out")]
    Timeout,

    #[error("store error: {0}")]
    Store(String),
}

pub type ReceiptTransferResult<T> = Result<T, ReceiptTransferError>;
