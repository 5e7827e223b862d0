use thiserror::Error;
use tichain_core::Classify;

/// Errors from the integrity chain store (component C4).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying embedded database error.
    #[error("chain database error: {0}")]
    Database(String),

    /// The worker thread that owns the chain database is gone.
    #[error("chain store worker unavailable")]
    WorkerUnavailable,

    /// Canonicalization/hashing error from `tichain-core`.
    #[error("canonicalization error: {0}")]
    Core(#[from] tichain_core::Error),
}

/// Result alias for chain operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        // A busy/locked embedded database is transient; anything else
        // (corruption, worker death) is treated as permanent so it
        // surfaces loudly rather than spinning forever.
        matches!(self, Error::Database(msg) if msg.contains("locked") || msg.contains("busy"))
    }
}
