//! Durable pre-publish shadow buffer (spec §4.3, component C3).
//!
//! Every batch is persisted here, compressed, before it is allowed to
//! reach the broker. Storage follows the same dedicated-worker-thread
//! shape as `tichain-chain` and the teacher's
//! `dashflow-streaming::backends::sqlite`.

pub mod error;
pub mod shadow;
pub mod store;

pub use error::{Error, Result};
pub use shadow::{ShadowBuffer, DEFAULT_COMPRESSION_LEVEL, DEFAULT_RETENTION};
pub use store::{ShadowStats, ShadowStore};
