use thiserror::Error;

/// Errors from tracing setup and the health/metrics HTTP server.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),

    #[error("metrics server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, Error>;
