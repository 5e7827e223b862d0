//! Per-source append-only integrity hash chain (spec §4.4, component C4).
//!
//! Storage follows the same dedicated-worker-thread shape as
//! `dashflow-streaming::backends::sqlite`: `rusqlite::Connection` is not
//! `Send`, so every query runs on one blocking thread reached over an
//! async channel, which also gives the chain its required per-source
//! write serialization for free.

pub mod chain;
pub mod error;
pub mod store;

pub use chain::IntegrityChain;
pub use error::{Error, Result};
pub use store::{ChainStore, ValidationOutcome, DEFAULT_RETAINED_HISTORY};
