//! Configuration for the ingestion pipeline orchestrator (C10) and gap
//! recovery controller (C11) (spec §10.4: one `Config` struct per
//! concern).

use std::time::Duration;

/// Default backoff applied after a transient error before the loop
/// retries (spec §4.10: "back off (default 1 s)").
pub const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_secs(1);

/// Default poll timeout passed to `Consumer.Consume` each iteration.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default lookback window for `Chain.DetectGaps` (spec §4.11).
pub const DEFAULT_GAP_LOOKBACK: chrono::Duration = chrono::Duration::hours(24);

/// Default interval between gap recovery scans.
pub const DEFAULT_RECOVERY_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for one [`crate::orchestrator::IngestionPipeline`] worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// A process/worker-unique identifier, carried into DLQ envelopes.
    pub consumer_id: String,
    pub poll_timeout: Duration,
    pub transient_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            consumer_id: "tichain-pipeline".to_string(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            transient_backoff: DEFAULT_TRANSIENT_BACKOFF,
        }
    }
}

/// Configuration for [`crate::recovery::GapRecoveryController`].
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub lookback: chrono::Duration,
    pub scan_interval: Duration,
    /// Topic replayed batches are republished to (spec §4.11: distinct
    /// from the real-time topic so recovery traffic is distinguishable).
    pub replay_topic: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            lookback: DEFAULT_GAP_LOOKBACK,
            scan_interval: DEFAULT_RECOVERY_SCAN_INTERVAL,
            replay_topic: tichain_broker::producer::DEFAULT_BACKFILL_TOPIC.to_string(),
        }
    }
}
