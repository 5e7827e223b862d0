//! Ingestion pipeline orchestrator (C10), gap recovery controller (C11)
//! and producer-side resilient wrapper (C12) for the temporal integrity
//! chain platform (spec §4.10-§4.12).
//!
//! Every error from a downstream crate is wrapped, never stringified, so
//! transient/permanent classification stays driven by the originating
//! component's own `Classify` impl (spec §9 REDESIGN FLAG) all the way
//! up through this crate's own [`Error`].

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod producer_wrapper;
pub mod recovery;

pub use config::{PipelineConfig, RecoveryConfig};
pub use error::{Error, Result};
pub use orchestrator::{IngestionPipeline, PipelineState};
pub use producer_wrapper::ProducerWrapper;
pub use recovery::GapRecoveryController;
