use thiserror::Error;
use tichain_core::Classify;

/// Errors from the idempotency store (spec §4.7, component C7).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis command error: {0}")]
    Command(String),
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
