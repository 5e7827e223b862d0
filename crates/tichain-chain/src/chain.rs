//! Public operations of the integrity chain (spec §4.4 component C4),
//! implemented on top of the embedded [`ChainStore`].

use crate::store::{ChainStore, ValidationOutcome};
use chrono::{DateTime, Utc};
use tichain_core::{ChainEntry, ChainGap, DataPointBatch, GapStatus};
use uuid::Uuid;

/// The integrity chain: a thin, named-operation facade over
/// [`ChainStore`] so callers spell out spec operations (`CreateEntry`,
/// `Validate`, ...) rather than raw storage calls.
#[derive(Clone)]
pub struct IntegrityChain {
    store: ChainStore,
}

impl IntegrityChain {
    #[must_use]
    pub fn new(store: ChainStore) -> Self {
        Self { store }
    }

    /// `CreateEntry`: hash and append a new link for `batch` (producer
    /// side, called from the resilient wrapper C12 after a publish is
    /// confirmed).
    pub async fn create_entry(&self, batch: &DataPointBatch) -> crate::error::Result<ChainEntry> {
        let data_hash =
            tichain_core::canonical::sha256_hex(&tichain_core::canonical::canonical_batch_bytes(batch)?);
        let (min_ts, max_ts) = batch.time_range().map_or((None, None), |(a, b)| (Some(a), Some(b)));
        self.store
            .create_entry(
                &batch.data_source_id,
                &batch.batch_id,
                batch.points.len(),
                min_ts,
                max_ts,
                data_hash,
            )
            .await
    }

    /// `GetLastEntry`.
    pub async fn last_entry(&self, source: &str) -> crate::error::Result<Option<ChainEntry>> {
        self.store.get_last_entry(source).await
    }

    /// Fetch a single entry by id (used by gap recovery to recover the
    /// original headers of a batch it is about to replay).
    pub async fn get_entry(&self, id: Uuid) -> crate::error::Result<Option<ChainEntry>> {
        self.store.get_entry_by_id(id).await
    }

    /// `Validate`: consumer-side integrity check (spec §8 property 2 and
    /// scenario S6).
    pub async fn validate(
        &self,
        source: &str,
        entry: ChainEntry,
    ) -> crate::error::Result<ValidationOutcome> {
        self.store.validate(source, entry).await
    }

    /// `DetectGaps`: gaps recorded for `source` since `since` (C11 uses a
    /// 24h lookback window by default).
    pub async fn detect_gaps(
        &self,
        source: &str,
        since: DateTime<Utc>,
    ) -> crate::error::Result<Vec<ChainGap>> {
        self.store.detect_gaps(source, since).await
    }

    /// Advance a gap through its recovery lifecycle (spec §3 ChainGap).
    pub async fn mark_gap(
        &self,
        gap_id: Uuid,
        status: GapStatus,
        last_error: Option<String>,
    ) -> crate::error::Result<()> {
        self.store.update_gap_status(gap_id, status, last_error).await
    }

    /// `Checkpoint`: attach an operator-supplied reason to the current
    /// tip of the chain (spec §4.4, e.g. after a manual audit or planned
    /// maintenance window).
    pub async fn checkpoint(
        &self,
        source: &str,
        reason: &str,
    ) -> crate::error::Result<Option<ChainEntry>> {
        self.store.checkpoint(source, reason).await
    }

    /// Health probe surfaced by the observability HTTP endpoint.
    pub async fn health_check(&self) -> crate::error::Result<()> {
        self.store.health_check().await
    }
}
