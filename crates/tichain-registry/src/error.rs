use thiserror::Error;
use tichain_core::Classify;

/// Errors from the point registry and lookup cache (components C1, C2).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("point not found: {0}")]
    NotFound(String),

    #[error("point already registered under a different definition: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Error::Query(e.to_string())
    }
}
