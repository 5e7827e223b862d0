//! Ingestion pipeline orchestrator (spec §4.10, component C10): the
//! central consume → dedup → enrich → write → cache → commit loop.
//!
//! Grounded on `dashflow-streaming::consumer`'s main consume loop
//! (poll/decode/process/commit, module-local `LazyLock<Counter>` metrics)
//! generalized from "stream telemetry ingestion" to "exactly-once sensor
//! ingestion" semantics, and on `dashflow-streaming::dlq`'s
//! failure-routing pattern for the deserialization and permanent-error
//! branches.

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tichain_broker::{
    BrokerConsumer, ChainHeaders, ConsumeOutcome, DlqHandler, DlqMessage, MessageContext,
};
use tichain_cache::CurrentValueCache;
use tichain_chain::IntegrityChain;
use tichain_core::{Classify, CurrentValue, DataPointBatch, PointDefaults};
use tichain_idempotency::IdempotencyStore;
use tichain_observability::{HealthState, PipelineMetrics};
use tichain_registry::{PointCache, PointRegistry};
use tichain_timeseries::TimeSeriesWriter;
use tracing::{error, info, warn};

/// Lifecycle state of one ingestion pipeline worker (spec §4.10: "{stopped
/// → starting → running → stopping → stopped, or → faulted}").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Faulted,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Stopped => "stopped",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Faulted => "faulted",
        };
        write!(f, "{s}")
    }
}

/// One logical processing loop over a consumer's assigned partitions
/// (spec §5: "the ingestion pipeline exposes a single logical processing
/// loop per consumed partition"). Multiple instances, each with its own
/// [`BrokerConsumer`] in the same consumer group, parallelise across
/// partitions.
pub struct IngestionPipeline {
    consumer: BrokerConsumer,
    dlq: DlqHandler,
    idempotency: IdempotencyStore,
    registry: Arc<PointRegistry>,
    point_cache: Arc<PointCache>,
    writer: TimeSeriesWriter,
    current_cache: CurrentValueCache,
    chain: IntegrityChain,
    metrics: Arc<PipelineMetrics>,
    health: HealthState,
    config: PipelineConfig,
    state: RwLock<PipelineState>,
    shutdown: Arc<AtomicBool>,
}

#[allow(clippy::too_many_arguments)]
impl IngestionPipeline {
    pub fn new(
        consumer: BrokerConsumer,
        dlq: DlqHandler,
        idempotency: IdempotencyStore,
        registry: Arc<PointRegistry>,
        point_cache: Arc<PointCache>,
        writer: TimeSeriesWriter,
        current_cache: CurrentValueCache,
        chain: IntegrityChain,
        metrics: Arc<PipelineMetrics>,
        health: HealthState,
        config: PipelineConfig,
    ) -> Self {
        Self {
            consumer,
            dlq,
            idempotency,
            registry,
            point_cache,
            writer,
            current_cache,
            chain,
            metrics,
            health,
            config,
            state: RwLock::new(PipelineState::Stopped),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    fn transition(&self, next: PipelineState) {
        let mut state = self.state.write();
        info!(from = %*state, to = %next, "pipeline state transition");
        *state = next;
    }

    /// Request a graceful stop. The in-flight iteration finishes before
    /// the loop observes the flag and transitions to `stopping`/`stopped`.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Runs the processing loop until `stop()` is called or an
    /// unrecoverable error faults the worker.
    pub async fn run(&self) -> Result<()> {
        self.transition(PipelineState::Starting);
        self.point_cache.refresh().await?;
        self.transition(PipelineState::Running);

        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(e) = self.process_once().await {
                error!(error = %e, "ingestion pipeline faulted");
                self.health.record_error(e.to_string());
                self.transition(PipelineState::Faulted);
                return Err(e);
            }
        }

        self.transition(PipelineState::Stopping);
        self.transition(PipelineState::Stopped);
        Ok(())
    }

    /// One iteration of the processing loop (spec §4.10 steps 1-10).
    async fn process_once(&self) -> Result<()> {
        let outcome = match self.consumer.consume(self.config.poll_timeout).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return Ok(()), // step 1: poll timeout, continue
            Err(e) => return Err(Error::Broker(e)),
        };

        match outcome {
            ConsumeOutcome::DeserializationFailure {
                context,
                raw_payload,
                error,
            } => self.handle_deserialization_failure(context, raw_payload, error).await,
            ConsumeOutcome::Batch {
                batch,
                context,
                chain_headers,
            } => self.process_batch(batch, context, chain_headers).await,
        }
    }

    /// Step 2: poison message → DLQ, commit, continue.
    async fn handle_deserialization_failure(
        &self,
        context: MessageContext,
        raw_payload: Vec<u8>,
        error: String,
    ) -> Result<()> {
        self.metrics.nonretryable_errors_total.inc();
        let message = DlqMessage::new(
            &raw_payload,
            format!("deserialization failed: {error}"),
            context.topic.clone(),
            context.partition,
            context.offset,
            self.config.consumer_id.clone(),
            "deserialization_error",
        );
        self.dlq.send(&message).await.map_err(Error::Broker)?;
        self.consumer.commit(&context).map_err(Error::Broker)
    }

    async fn process_batch(
        &self,
        batch: DataPointBatch,
        context: MessageContext,
        chain_headers: Option<ChainHeaders>,
    ) -> Result<()> {
        // Chain validation (spec §8 property 2, §7 ChainValidationFailure):
        // best-effort and non-blocking, so a failure here never affects
        // the dedup/enrich/write/commit outcome below.
        self.validate_chain(&batch, chain_headers).await;

        // Step 3: dedup.
        let (duplicate, _) = self.idempotency.check(&batch.batch_id).await?;
        if duplicate {
            self.metrics.duplicate_batches_total.inc();
            info!(batch_id = %batch.batch_id, "duplicate batch skipped");
            return self.consumer.commit(&context).map_err(Error::Broker);
        }

        // Step 4: empty batch.
        if batch.points.is_empty() {
            self.idempotency.mark_processed(&batch.batch_id).await?;
            return self.consumer.commit(&context).map_err(Error::Broker);
        }

        // Steps 5-8, single catch: transient → no commit, back off, loop
        // (redelivery); permanent → DLQ + commit (spec §4.10).
        match self.apply_batch(batch.clone()).await {
            Ok(()) => self.consumer.commit(&context).map_err(Error::Broker),
            Err(e) if e.is_retryable() => {
                self.metrics.transient_retries_total.inc();
                warn!(
                    batch_id = %batch.batch_id,
                    error = %e,
                    backoff_ms = self.config.transient_backoff.as_millis(),
                    "transient processing error; backing off without committing"
                );
                tokio::time::sleep(self.config.transient_backoff).await;
                Ok(())
            }
            Err(e) => {
                self.metrics.nonretryable_errors_total.inc();
                error!(batch_id = %batch.batch_id, error = %e, "permanent processing error; routing to DLQ");
                let payload = serde_json::to_vec(&batch).unwrap_or_default();
                let message = DlqMessage::new(
                    &payload,
                    e.to_string(),
                    context.topic.clone(),
                    context.partition,
                    context.offset,
                    self.config.consumer_id.clone(),
                    "permanent_processing_error",
                );
                self.dlq.send(&message).await.map_err(Error::Broker)?;
                self.consumer.commit(&context).map_err(Error::Broker)
            }
        }
    }

    /// Runs `IntegrityChain::validate` against the chain headers the
    /// producer attached to this message (spec §4.4 `Validate`, §8
    /// property 2 "Chain continuity"). Skipped silently when the message
    /// carries no chain headers (e.g. an older message published before
    /// this wiring existed); a mismatch records a `ChainGap` for the gap
    /// recovery controller (C11) to pick up but never fails the batch.
    async fn validate_chain(&self, batch: &DataPointBatch, chain_headers: Option<ChainHeaders>) {
        let Some(headers) = chain_headers else {
            return;
        };
        let (min_ts, max_ts) = batch.time_range().map_or((None, None), |(a, b)| (Some(a), Some(b)));
        let entry = tichain_core::ChainEntry {
            id: uuid::Uuid::new_v4(),
            data_source_id: batch.data_source_id.clone(),
            sequence: headers.sequence,
            batch_id: batch.batch_id.clone(),
            point_count: batch.points.len(),
            min_ts,
            max_ts,
            created_at: chrono::Utc::now(),
            previous_hash: headers.previous_hash,
            data_hash: String::new(),
            chain_hash: headers.chain_hash,
            checkpoint: None,
        };

        match self.chain.validate(&batch.data_source_id, entry).await {
            Ok(tichain_chain::ValidationOutcome::Valid) => {}
            Ok(tichain_chain::ValidationOutcome::Invalid {
                expected_sequence,
                actual_sequence,
                gap,
            }) => {
                self.metrics.chain_gaps_detected_total.inc();
                warn!(
                    batch_id = %batch.batch_id,
                    data_source_id = %batch.data_source_id,
                    expected_sequence,
                    actual_sequence,
                    gap_id = %gap.id,
                    "chain validation detected a gap"
                );
            }
            Err(e) => {
                warn!(batch_id = %batch.batch_id, error = %e, "chain validation failed; continuing without recording a gap");
            }
        }
    }

    /// Steps 5-8: enrich, write, update the current-value cache, mark
    /// processed. `MarkProcessed` is guaranteed to run only after the
    /// writer has acknowledged (spec §4.10 invariant).
    async fn apply_batch(&self, mut batch: DataPointBatch) -> Result<()> {
        // Step 5: enrichment.
        for point in &mut batch.points {
            if !point.needs_resolution() {
                continue;
            }
            if let Some(existing) = self.point_cache.by_name(&batch.data_source_id, &point.point_name) {
                point.sequence_id = existing.sequence_id;
                continue;
            }
            // Auto-register; `PointRegistry::register` is itself the
            // tie-break for concurrent arrivals of the same name (spec
            // §4.10: "the later discovers the existing registration and
            // reuses its sequence id").
            let registered = self
                .registry
                .register(&batch.data_source_id, &point.point_name, &PointDefaults::default())
                .await?;
            point.sequence_id = registered.sequence_id;
            if let Err(e) = self.point_cache.refresh().await {
                warn!(error = %e, "point cache refresh after auto-registration failed");
            }
        }

        // Step 6: write. Points still unresolved or non-finite are
        // dropped by the writer itself with a warning (spec §4.8(b),
        // §4.10 step 5c).
        self.writer.write(&batch).await?;

        // Step 7: current-value update, newest-per-sequence-id with
        // last-in-batch tie-break (spec §4.10 tie-break rule). A cache
        // failure is logged only and never fails the batch.
        let current_values = newest_per_sequence(&batch, &self.metrics);
        if let Err(e) = self.current_cache.set_many(&current_values).await {
            warn!(batch_id = %batch.batch_id, error = %e, "current-value cache update failed, continuing");
        }

        // Step 8: mark processed, only after the writer has acknowledged.
        self.idempotency.mark_processed(&batch.batch_id).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        self.consumer.health_check().map_err(Error::Broker)?;
        self.idempotency.health_check().await?;
        self.writer.health_check().await?;
        self.current_cache.health_check().await?;
        self.registry.health_check().await?;
        self.chain.health_check().await.map_err(Error::Chain)?;
        Ok(())
    }
}

/// Picks, per sequence id, the point with the maximum timestamp in the
/// batch; ties are broken by last-in-batch order (spec §4.10 tie-break).
/// Non-finite values never reach here (rejected by the writer / dropped
/// with a warning here) and unresolved points (`sequence_id <= 0`) are
/// excluded since the cache is keyed by sequence id.
fn newest_per_sequence(batch: &DataPointBatch, metrics: &PipelineMetrics) -> Vec<CurrentValue> {
    let mut latest: HashMap<i64, CurrentValue> = HashMap::new();
    for point in &batch.points {
        if point.sequence_id <= 0 {
            continue;
        }
        if !point.value.is_finite() {
            metrics.nonfinite_values_total.inc();
            continue;
        }
        let candidate = CurrentValue {
            sequence_id: point.sequence_id,
            timestamp: point.timestamp,
            value: point.value,
            quality: point.quality,
        };
        match latest.get(&point.sequence_id) {
            Some(existing) if candidate.timestamp < existing.timestamp => {}
            _ => {
                latest.insert(point.sequence_id, candidate);
            }
        }
    }
    latest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tichain_core::{DataPoint, Quality};

    fn point(seq: i64, ts: chrono::DateTime<Utc>, value: f64) -> DataPoint {
        DataPoint {
            sequence_id: seq,
            point_name: String::new(),
            timestamp: ts,
            value,
            quality: Quality::Good,
            source_address: None,
        }
    }

    #[test]
    fn newest_per_sequence_picks_max_timestamp() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t2 = t1 + chrono::Duration::seconds(5);
        let batch = DataPointBatch {
            batch_id: "b1".into(),
            data_source_id: "src1".into(),
            created_at: t2,
            points: vec![point(1, t1, 1.0), point(1, t2, 2.0)],
        };
        let metrics = PipelineMetrics::new();
        let values = newest_per_sequence(&batch, &metrics);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, 2.0);
    }

    #[test]
    fn newest_per_sequence_ties_prefer_last_in_batch() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let batch = DataPointBatch {
            batch_id: "b1".into(),
            data_source_id: "src1".into(),
            created_at: t1,
            points: vec![point(1, t1, 1.0), point(1, t1, 2.0)],
        };
        let metrics = PipelineMetrics::new();
        let values = newest_per_sequence(&batch, &metrics);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, 2.0);
    }

    #[test]
    fn newest_per_sequence_drops_nonfinite_and_unresolved() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let batch = DataPointBatch {
            batch_id: "b1".into(),
            data_source_id: "src1".into(),
            created_at: t1,
            points: vec![point(0, t1, 1.0), point(2, t1, f64::NAN)],
        };
        let metrics = PipelineMetrics::new();
        let values = newest_per_sequence(&batch, &metrics);
        assert!(values.is_empty());
    }

    #[test]
    fn pipeline_state_display_matches_spec_vocabulary() {
        assert_eq!(PipelineState::Running.to_string(), "running");
        assert_eq!(PipelineState::Faulted.to_string(), "faulted");
    }
}
