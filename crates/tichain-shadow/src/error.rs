use thiserror::Error;
use tichain_core::Classify;

/// Errors from the shadow buffer (component C3).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("shadow database error: {0}")]
    Database(String),

    #[error("shadow store worker unavailable")]
    WorkerUnavailable,

    #[error("shadow entry {0} not found")]
    NotFound(uuid::Uuid),

    #[error("compression error: {0}")]
    Core(#[from] tichain_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Error::Database(msg) if msg.contains("locked") || msg.contains("busy"))
    }
}
