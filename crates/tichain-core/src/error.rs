use thiserror::Error;

/// Errors shared across the ingestion platform's core data model.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A `DataPoint` carried a non-finite value (NaN/±inf); it must be
    /// dropped, never persisted (spec §3 DataPoint invariant).
    #[error("non-finite value for point {point}: {value}")]
    NonFiniteValue { point: String, value: f64 },

    /// Neither `sequence_id` nor `point_name` identified the point.
    #[error("data point has no sequence id and no point name")]
    UnidentifiedPoint,

    /// Canonical serialization failed (should not happen for well-formed
    /// batches; surfaced rather than panicking).
    #[error("canonical serialization error: {0}")]
    Canonicalization(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for `tichain-core` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed transient/permanent classification, replacing the source
/// system's substring-matching heuristic (spec §9 REDESIGN FLAGS).
///
/// Implementors of `Classify` are downstream errors (broker, writer,
/// cache, registry). `is_retryable() == true` means the pipeline must not
/// commit its consumer offset and should retry after backoff; `false`
/// means the failure is permanent and the message should be routed to the
/// dead-letter queue and the offset committed (spec §7).
pub trait Classify {
    /// Whether this error represents a transient condition that a retry
    /// may resolve.
    fn is_retryable(&self) -> bool;
}
