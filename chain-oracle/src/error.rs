use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainOracleError {
    #[error("block {0} is unknown to the lite node (pruned)")]
    UnknownBlock(i64),

    #[error("block {0} could not be resolved on the archive node either")]
    UnknownBlockOnArchive(i64),

    #[error("an archive chain source is required but none is configured")]
    ArchiveNotConfigured,

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("malformed chain response: {0}")]
    Decode(String),

    #[error("chain read timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type ChainOracleResult<T> = Result<T, ChainOracleError>;

impl ChainOracleError {
    /// spec.md §7: `UnknownBlock` is `Transient` for the lite source (the
    /// archive-fallback wrapper retries it), but terminal once it has
    /// already failed against the archive.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainOracleError::Transport(_) | ChainOracleError::Timeout(_)
        )
    }
}
