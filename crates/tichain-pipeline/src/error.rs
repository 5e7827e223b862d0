use thiserror::Error;
use tichain_core::Classify;

/// Errors surfaced by the ingestion pipeline orchestrator (C10), the gap
/// recovery controller (C11) and the producer-side resilient wrapper
/// (C12). Every downstream component error is wrapped rather than
/// stringified, so `is_retryable()` stays driven by the originating
/// component's own typed classification (spec §9 REDESIGN FLAG) instead of
/// a second layer of heuristics.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("registry error: {0}")]
    Registry(#[from] tichain_registry::Error),

    #[error("shadow buffer error: {0}")]
    Shadow(#[from] tichain_shadow::Error),

    #[error("integrity chain error: {0}")]
    Chain(#[from] tichain_chain::Error),

    #[error("broker error: {0}")]
    Broker(#[from] tichain_broker::Error),

    #[error("idempotency store error: {0}")]
    Idempotency(#[from] tichain_idempotency::Error),

    #[error("time-series writer error: {0}")]
    Timeseries(#[from] tichain_timeseries::Error),

    #[error("current-value cache error: {0}")]
    Cache(#[from] tichain_cache::Error),

    /// A control-surface call (`stop`, `recover`, ...) was made while the
    /// pipeline was not in a state that supports it.
    #[error("pipeline is not running (state: {0})")]
    NotRunning(String),

    /// A batch could not be classified transient or permanent by any
    /// downstream error and defaults to permanent (spec §7: "any error
    /// that cannot be classified transient defaults to permanent").
    #[error("unclassified processing failure: {0}")]
    Unclassified(String),

    /// A shadow entry has no linked chain entry (or the link is stale),
    /// so gap recovery has no original headers to replay it with.
    #[error("shadow entry {0} has no recoverable chain entry")]
    MissingChainLink(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Registry(e) => e.is_retryable(),
            Error::Shadow(e) => e.is_retryable(),
            Error::Chain(e) => e.is_retryable(),
            Error::Broker(e) => e.is_retryable(),
            Error::Idempotency(e) => e.is_retryable(),
            Error::Timeseries(e) => e.is_retryable(),
            Error::Cache(e) => e.is_retryable(),
            Error::NotRunning(_) | Error::Unclassified(_) | Error::MissingChainLink(_) => false,
        }
    }
}
