//! Time-series writer (spec §4.8, component C8) for the temporal
//! integrity chain platform.

pub mod error;
pub mod writer;

pub use error::{Error, Result};
pub use writer::TimeSeriesWriter;
