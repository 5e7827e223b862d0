use thiserror::Error;
use tichain_core::Classify;

/// Errors from the current-value cache (spec §4.9, component C9).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            Error::Connection(e.to_string())
        } else {
            Error::Command(e.to_string())
        }
    }
}
