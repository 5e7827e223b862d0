//! Shared data model, canonical serialization and error classification for
//! the temporal integrity chain ingestion platform.
//!
//! This crate has no I/O of its own; every other crate in the workspace
//! depends on it for the wire/data types defined in spec §3.

/// Deterministic serialization used as the pre-image for chain hashing.
pub mod canonical;
/// Zstd compression used by the shadow buffer (spec §4.3).
pub mod compression;
/// Shared error type and the `Classify` trait (spec §9 REDESIGN FLAGS).
pub mod error;
/// Core data model: `Point`, `DataPoint`, `DataPointBatch`, `ChainEntry`,
/// `ChainGap`, `ShadowEntry`, `CurrentValue`, `IdempotencyRecord`.
pub mod model;
/// `Quality` and `ValueType` enums.
pub mod quality;

pub use error::{Classify, Error, Result};
pub use model::*;
pub use quality::{Quality, ValueType};
