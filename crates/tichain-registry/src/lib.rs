//! Point registry (spec §4.1, component C1) and point lookup cache
//! (spec §4.2, component C2) for the temporal integrity chain platform.

pub mod cache;
pub mod error;
pub mod registry;

pub use cache::{PointCache, DEFAULT_REFRESH_INTERVAL};
pub use error::{Error, Result};
pub use registry::PointRegistry;
