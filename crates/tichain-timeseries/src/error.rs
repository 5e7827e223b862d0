use thiserror::Error;
use tichain_core::Classify;

/// Errors from the time-series writer (spec §4.8, component C8).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Availability-class failure (network, timeout): the pipeline must
    /// not commit its consumer offset and should retry after backoff.
    #[error("transient write error: {0}")]
    Transient(String),

    /// Format-class failure (rejected schema, malformed row): retrying
    /// cannot help; the pipeline routes the batch to the DLQ and commits.
    #[error("permanent write error: {0}")]
    Permanent(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

/// Maps a raw `clickhouse` client error onto the spec's 4xx/5xx-style
/// split (spec §4.8(c)) by matching the client's own transport/protocol
/// variants, not by substring-matching `Display` text (spec §9 REDESIGN
/// FLAG): a transport-layer failure is availability-class and retryable;
/// anything the server itself rejected (a bad response, a malformed
/// insert) is format-class and permanent.
pub fn classify_clickhouse_error(err: clickhouse::error::Error) -> Error {
    use clickhouse::error::Error as ChError;
    let message = err.to_string();
    match err {
        ChError::Network(_) => Error::Transient(message),
        _ => Error::Permanent(message),
    }
}
