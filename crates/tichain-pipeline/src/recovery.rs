//! Gap recovery controller (spec §4.11, component C11): periodically
//! detects chain gaps and replays the shadow-buffered entries that back
//! them. Duplicates produced by replay are absorbed downstream by the
//! idempotency store (C7).
//!
//! Grounded on `dashflow-streaming::dlq`'s replay/reprocessing loop
//! structure (scan → fetch → republish → mark-handled), adapted from
//! "redrive failed messages on demand" to "replay shadow entries behind a
//! detected chain gap".

use crate::config::RecoveryConfig;
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tichain_broker::BrokerProducer;
use tichain_chain::IntegrityChain;
use tichain_core::{ChainGap, DataPointBatch, GapStatus};
use tichain_observability::PipelineMetrics;
use tichain_registry::PointRegistry;
use tichain_shadow::ShadowBuffer;
use tracing::{info, warn};

/// Periodically (and on demand) scans for unresolved chain gaps and
/// replays the shadow entries that back them (spec §4.11).
pub struct GapRecoveryController {
    chain: IntegrityChain,
    shadow: ShadowBuffer,
    producer: BrokerProducer,
    registry: Arc<PointRegistry>,
    metrics: Arc<PipelineMetrics>,
    config: RecoveryConfig,
}

impl GapRecoveryController {
    pub fn new(
        chain: IntegrityChain,
        shadow: ShadowBuffer,
        producer: BrokerProducer,
        registry: Arc<PointRegistry>,
        metrics: Arc<PipelineMetrics>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            chain,
            shadow,
            producer,
            registry,
            metrics,
            config,
        }
    }

    /// Runs one on-demand or scheduled recovery pass (spec §4.11 steps
    /// 1-3) across every known data source.
    pub async fn run_once(&self) -> Result<()> {
        let sources = self.enumerate_sources().await?;
        for source in sources {
            if let Err(e) = self.recover_source(&source).await {
                warn!(source = %source, error = %e, "gap recovery pass failed for source");
            }
        }
        Ok(())
    }

    /// Runs the recovery loop forever at `config.scan_interval`, until
    /// the returned handle's future is dropped/cancelled by the caller.
    pub async fn run_periodic(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        loop {
            ticker.tick().await;
            self.run_once().await?;
        }
    }

    /// Step 1: distinct data sources known to the point registry. A
    /// source with no registered points cannot have chain entries either,
    /// so this is a complete enumeration without a dedicated index.
    async fn enumerate_sources(&self) -> Result<Vec<String>> {
        let points = self.registry.list_all().await?;
        let sources: BTreeSet<String> = points.into_iter().map(|p| p.data_source_id).collect();
        Ok(sources.into_iter().collect())
    }

    /// Steps 2-3 for a single source: detect gaps, replay each
    /// non-terminal one. Public so the `recover --source` CLI command can
    /// target one source on demand without sweeping every known source.
    pub async fn recover_source(&self, source: &str) -> Result<()> {
        let gaps = self.chain.detect_gaps(source, self.lookback_start()).await?;
        for gap in gaps {
            if gap.status.is_terminal() {
                continue;
            }
            self.recover_gap(source, gap).await?;
        }
        Ok(())
    }

    fn lookback_start(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now() - self.config.lookback
    }

    /// Step 3 for one gap: fetch the shadow entries covering it, replay
    /// each, and advance the gap's lifecycle status.
    async fn recover_gap(&self, source: &str, gap: ChainGap) -> Result<()> {
        let (Some(start), Some(end)) = (gap.gap_start, gap.gap_end) else {
            self.chain
                .mark_gap(gap.id, GapStatus::Failed, Some("gap has no bounded time range to replay".to_string()))
                .await?;
            return Ok(());
        };

        let entries = self.shadow.for_recovery(source, start, end).await?;
        if entries.is_empty() {
            self.chain
                .mark_gap(gap.id, GapStatus::Failed, Some("no shadow data available to replay".to_string()))
                .await?;
            return Ok(());
        }

        self.chain.mark_gap(gap.id, GapStatus::Recovering, None).await?;

        let mut last_error = None;
        let mut recovered_count = 0usize;
        for entry in &entries {
            match self.replay_entry(entry).await {
                Ok(()) => {
                    self.shadow.confirm(entry.shadow_id).await?;
                    recovered_count += 1;
                }
                Err(e) => {
                    warn!(source = %source, shadow_id = %entry.shadow_id, error = %e, "gap recovery replay failed for shadow entry");
                    last_error = Some(e.to_string());
                }
            }
        }

        if recovered_count == entries.len() {
            self.chain.mark_gap(gap.id, GapStatus::Recovered, None).await?;
            self.metrics.recovered_gaps_total.inc();
            info!(source = %source, gap_id = %gap.id, entries = entries.len(), "gap recovered");
        } else {
            self.chain
                .mark_gap(gap.id, GapStatus::Detected, last_error)
                .await?;
        }
        Ok(())
    }

    /// Step 3c: re-deserialize and republish one shadow entry, carrying
    /// its original chain headers so the consumer-side `Validate` call
    /// sees the same sequence/hash the entry was created with rather than
    /// a fabricated one.
    async fn replay_entry(&self, entry: &tichain_core::ShadowEntry) -> Result<()> {
        let chain_entry_id = entry
            .chain_entry_id
            .ok_or_else(|| Error::MissingChainLink(entry.shadow_id))?;
        let chain_entry = self
            .chain
            .get_entry(chain_entry_id)
            .await?
            .ok_or_else(|| Error::MissingChainLink(entry.shadow_id))?;

        let batch: DataPointBatch = self.shadow.decode(entry)?;
        self.producer
            .publish_to(&self.config.replay_topic, &batch, &chain_entry)
            .await
            .map_err(Error::Broker)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.chain.health_check().await?;
        self.shadow.health_check().await?;
        self.producer.health_check().map_err(Error::Broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_with_missing_bounds_has_no_replayable_range() {
        let gap = ChainGap {
            id: uuid::Uuid::new_v4(),
            data_source_id: "src1".into(),
            last_good_sequence: 1,
            first_bad_sequence: 3,
            gap_start: None,
            gap_end: None,
            detected_at: chrono::Utc::now(),
            status: GapStatus::Detected,
            recovery_attempts: 0,
            last_error: None,
        };
        assert!(gap.gap_start.is_none() && gap.gap_end.is_none());
        assert_eq!(gap.missing_count(), 1);
    }
}
