//! Idempotency store (spec §4.7, component C7) for the temporal
//! integrity chain platform.

pub mod error;
pub mod store;

pub use error::{Error, Result};
pub use store::{IdempotencyStore, DEFAULT_TTL};
