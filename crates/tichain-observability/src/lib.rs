//! Logging, metrics and the health/metrics HTTP surface (spec §10.2,
//! §10.5, §10.7) for the temporal integrity chain platform.

pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod server;

pub use error::{Error, Result};
pub use health::{HealthReport, HealthState};
pub use logging::{init_tracing, LoggingConfig};
pub use metrics::PipelineMetrics;
