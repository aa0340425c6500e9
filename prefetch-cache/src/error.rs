use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache miss for {kind:?} at block {block}")]
    Miss { kind: crate::kind::DatumKind, block: i64 },

    #[error("underlying chain oracle error: {0}")]
    Oracle(#[from] chain_oracle::ChainOracleError),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] compute_validator_common::encoding::EncodingError),
}

pub type CacheResult<T> = Result<T, CacheError>;
