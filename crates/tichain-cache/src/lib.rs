//! Current-value cache (spec §4.9, component C9) for the temporal
//! integrity chain platform.

pub mod cache;
pub mod error;

pub use cache::CurrentValueCache;
pub use error::{Error, Result};
