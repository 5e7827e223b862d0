//! Public operations of the shadow buffer (spec §4.3, component C3).

use crate::error::Result;
use crate::store::{ShadowStats, ShadowStore};
use chrono::{DateTime, Duration, Utc};
use tichain_core::{DataPointBatch, ShadowEntry};
use uuid::Uuid;

/// Default retention for confirmed entries (spec §4.3: "Default retention
/// 7 days").
pub const DEFAULT_RETENTION: Duration = Duration::days(7);

/// Compression level applied to buffered payloads. Level 3 matches the
/// teacher's "fast, real-time streaming" tier since buffering sits on
/// the producer's latency-sensitive critical path.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// The shadow buffer: durable pre-publish storage of every batch,
/// confirmed once the downstream pipeline has durably applied it.
#[derive(Clone)]
pub struct ShadowBuffer {
    store: ShadowStore,
}

impl ShadowBuffer {
    #[must_use]
    pub fn new(store: ShadowStore) -> Self {
        Self { store }
    }

    /// `Buffer(batch, source) -> shadow-id`. Serializes and compresses
    /// `batch`, then persists it durably before returning. Callers must
    /// not publish to the broker until this resolves (spec §4.3 contract,
    /// §4.12 `PublishAsync` step 1).
    pub async fn buffer(
        &self,
        batch: &DataPointBatch,
        chain_entry_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let raw = serde_json::to_vec(batch).map_err(tichain_core::Error::from)?;
        let payload = tichain_core::compression::compress(&raw, DEFAULT_COMPRESSION_LEVEL)?;
        let (min_ts, max_ts) = batch
            .time_range()
            .map_or((None, None), |(a, b)| (Some(a), Some(b)));

        let entry = ShadowEntry {
            shadow_id: Uuid::new_v4(),
            data_source_id: batch.data_source_id.clone(),
            batch_id: batch.batch_id.clone(),
            chain_entry_id,
            point_count: batch.points.len(),
            payload,
            compressed: true,
            buffered_at: Utc::now(),
            confirmed_at: None,
            min_ts,
            max_ts,
        };
        self.store.buffer(entry).await
    }

    /// Decompress and deserialize a shadow entry's payload back into a
    /// batch, used by the gap recovery controller (C11) to replay.
    pub fn decode(&self, entry: &ShadowEntry) -> Result<DataPointBatch> {
        let raw = if entry.compressed {
            tichain_core::compression::decompress(
                &entry.payload,
                tichain_core::compression::DEFAULT_MAX_DECOMPRESSED_SIZE,
            )?
        } else {
            entry.payload.clone()
        };
        Ok(serde_json::from_slice(&raw).map_err(tichain_core::Error::from)?)
    }

    /// `Confirm(shadow-id)`.
    pub async fn confirm(&self, shadow_id: Uuid) -> Result<()> {
        self.store.confirm(shadow_id).await
    }

    /// Back-fill the chain entry id onto an already-buffered shadow entry,
    /// once the chain entry exists (spec §4.12 step 2 runs after step 1).
    pub async fn attach_chain_entry(&self, shadow_id: Uuid, chain_entry_id: Uuid) -> Result<()> {
        self.store.attach_chain_entry(shadow_id, chain_entry_id).await
    }

    /// `GetUnconfirmed(source, since)`.
    pub async fn unconfirmed(
        &self,
        source: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ShadowEntry>> {
        self.store.get_unconfirmed(source, since).await
    }

    /// `GetForRecovery(source, from, to)`.
    pub async fn for_recovery(
        &self,
        source: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ShadowEntry>> {
        self.store.get_for_recovery(source, from, to).await
    }

    /// `PurgeExpired(retention)`; pass `None` to use the default 7 day
    /// retention.
    pub async fn purge_expired(&self, retention: Option<Duration>) -> Result<u64> {
        self.store
            .purge_expired(retention.unwrap_or(DEFAULT_RETENTION))
            .await
    }

    /// `Stats()`.
    pub async fn stats(&self, source: &str) -> Result<ShadowStats> {
        self.store.stats(source).await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tichain_core::{DataPoint, Quality};

    fn batch() -> DataPointBatch {
        DataPointBatch {
            batch_id: "b1".into(),
            data_source_id: "src1".into(),
            created_at: Utc::now(),
            points: vec![DataPoint {
                sequence_id: 1,
                point_name: "TEMP".into(),
                timestamp: Utc::now(),
                value: 42.5,
                quality: Quality::Good,
                source_address: None,
            }],
        }
    }

    #[tokio::test]
    async fn buffer_and_decode_round_trips() {
        let store = ShadowStore::open_in_memory().await.unwrap();
        let buffer = ShadowBuffer::new(store);
        let original = batch();
        let id = buffer.buffer(&original, None).await.unwrap();

        let entries = buffer
            .unconfirmed("src1", Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].shadow_id, id);

        let decoded = buffer.decode(&entries[0]).unwrap();
        assert_eq!(decoded.batch_id, original.batch_id);
        assert_eq!(decoded.points[0].value, original.points[0].value);
    }
}
