use crate::error::{Error, Result};
use crate::quality::{Quality, ValueType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered measurement channel (spec §3 Point, component C1).
///
/// `sequence_id`, once assigned, is immutable and never reused. `name` is
/// unique within `data_source_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: Uuid,
    pub sequence_id: i64,
    pub data_source_id: String,
    pub name: String,
    pub description: Option<String>,
    pub units: Option<String>,
    pub value_type: ValueType,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable subset of `Point` accepted by `Update` (spec §4.1); never
/// includes `sequence_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointPatch {
    pub description: Option<String>,
    pub units: Option<String>,
    pub value_type: Option<ValueType>,
    pub enabled: Option<bool>,
}

/// Defaults supplied to `Register` when a point does not yet exist.
#[derive(Debug, Clone)]
pub struct PointDefaults {
    pub description: Option<String>,
    pub units: Option<String>,
    pub value_type: ValueType,
}

impl Default for PointDefaults {
    fn default() -> Self {
        Self {
            description: None,
            units: None,
            value_type: ValueType::Numeric,
        }
    }
}

/// A single in-flight sample (spec §3 DataPoint).
///
/// `sequence_id == 0` means "unresolved"; such points must carry a
/// non-empty `point_name` so the pipeline can resolve or auto-register
/// them (spec §4.10 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(rename = "pointSequenceId", default)]
    pub sequence_id: i64,
    #[serde(rename = "pointName", default)]
    pub point_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub quality: Quality,
    #[serde(rename = "sourceAddress", default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
}

impl DataPoint {
    /// Validate the point against spec §3 DataPoint invariants. Returns
    /// `Err` for points that must never be persisted.
    pub fn validate(&self) -> Result<()> {
        if self.sequence_id <= 0 && self.point_name.trim().is_empty() {
            return Err(Error::UnidentifiedPoint);
        }
        if !self.value.is_finite() {
            return Err(Error::NonFiniteValue {
                point: if self.point_name.is_empty() {
                    self.sequence_id.to_string()
                } else {
                    self.point_name.clone()
                },
                value: self.value,
            });
        }
        Ok(())
    }

    /// Whether this point still needs name→sequence-id resolution (spec
    /// §4.10 step 5).
    #[must_use]
    pub fn needs_resolution(&self) -> bool {
        self.sequence_id <= 0
    }
}

/// An immutable batch of points from one data source (spec §3
/// DataPointBatch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPointBatch {
    #[serde(rename = "batchId")]
    pub batch_id: String,
    #[serde(rename = "dataSourceId")]
    pub data_source_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub points: Vec<DataPoint>,
}

impl DataPointBatch {
    /// Minimum and maximum point timestamp in the batch, or `None` for an
    /// empty batch (spec §3 ShadowEntry min/max).
    #[must_use]
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut min = None;
        let mut max = None;
        for p in &self.points {
            min = Some(min.map_or(p.timestamp, |m: DateTime<Utc>| m.min(p.timestamp)));
            max = Some(max.map_or(p.timestamp, |m: DateTime<Utc>| m.max(p.timestamp)));
        }
        min.zip(max)
    }
}

/// Genesis previous-hash constant: 64 hex zeros, one per nibble of a
/// sha256 digest (spec §3 ChainEntry invariant, §4.4).
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// A chain checkpoint marker (spec §3 ChainEntry "optional checkpoint
/// marker with reason").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMarker {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// An append-only integrity chain record (spec §3 ChainEntry, component
/// C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub id: Uuid,
    pub data_source_id: String,
    pub sequence: u64,
    pub batch_id: String,
    pub point_count: usize,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub previous_hash: String,
    pub data_hash: String,
    pub chain_hash: String,
    pub checkpoint: Option<CheckpointMarker>,
}

/// Lifecycle status of a detected chain gap (spec §3 ChainGap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapStatus {
    Detected,
    Recovering,
    Recovered,
    Failed,
    Abandoned,
}

impl GapStatus {
    /// Terminal statuses are never revisited by the recovery controller
    /// (spec §3 ChainGap lifecycle).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, GapStatus::Recovered | GapStatus::Abandoned)
    }
}

/// A detected missing range of chain sequence numbers (spec §3 ChainGap,
/// component C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainGap {
    pub id: Uuid,
    pub data_source_id: String,
    pub last_good_sequence: u64,
    pub first_bad_sequence: u64,
    pub gap_start: Option<DateTime<Utc>>,
    pub gap_end: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    pub status: GapStatus,
    pub recovery_attempts: u32,
    pub last_error: Option<String>,
}

impl ChainGap {
    /// `missing_count = first_bad - last_good - 1` (spec §3).
    #[must_use]
    pub fn missing_count(&self) -> u64 {
        self.first_bad_sequence
            .saturating_sub(self.last_good_sequence)
            .saturating_sub(1)
    }
}

/// A producer-side durable record of a batch prior to (or pending)
/// broker publish (spec §3 ShadowEntry, component C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowEntry {
    pub shadow_id: Uuid,
    pub data_source_id: String,
    pub batch_id: String,
    pub chain_entry_id: Option<Uuid>,
    pub point_count: usize,
    /// Serialized `DataPointBatch`, optionally zstd-compressed.
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub buffered_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
}

/// Latest known value for a point (spec §3 CurrentValue, component C9).
///
/// Invariant: replacing a current value with one bearing an older
/// timestamp is prohibited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CurrentValue {
    pub sequence_id: i64,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub quality: Quality,
}

impl CurrentValue {
    /// Whether `other` is newer and may replace `self` (spec §3
    /// CurrentValue invariant, §4.10 tie-break: max timestamp, ties to
    /// last-in-batch-order handled by the caller).
    #[must_use]
    pub fn superseded_by(&self, other_timestamp: DateTime<Utc>) -> bool {
        other_timestamp >= self.timestamp
    }
}

/// A durable record that a batch's effects have been applied (spec §3
/// Idempotency Record, component C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub batch_id: String,
    pub first_processed_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_point_rejects_nonfinite() {
        let p = DataPoint {
            sequence_id: 1,
            point_name: "TEMP".into(),
            timestamp: Utc::now(),
            value: f64::NAN,
            quality: Quality::Good,
            source_address: None,
        };
        assert!(matches!(p.validate(), Err(Error::NonFiniteValue { .. })));
    }

    #[test]
    fn data_point_requires_identity() {
        let p = DataPoint {
            sequence_id: 0,
            point_name: String::new(),
            timestamp: Utc::now(),
            value: 1.0,
            quality: Quality::Good,
            source_address: None,
        };
        assert!(matches!(p.validate(), Err(Error::UnidentifiedPoint)));
    }

    #[test]
    fn data_point_valid_by_name_only() {
        let p = DataPoint {
            sequence_id: 0,
            point_name: "FLOW-9".into(),
            timestamp: Utc::now(),
            value: 3.5,
            quality: Quality::Good,
            source_address: None,
        };
        assert!(p.validate().is_ok());
        assert!(p.needs_resolution());
    }

    #[test]
    fn current_value_monotonic() {
        let now = Utc::now();
        let cv = CurrentValue {
            sequence_id: 1,
            timestamp: now,
            value: 1.0,
            quality: Quality::Good,
        };
        assert!(!cv.superseded_by(now - chrono::Duration::seconds(1)));
        assert!(cv.superseded_by(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn genesis_hash_is_64_hex_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn chain_gap_missing_count() {
        let gap = ChainGap {
            id: Uuid::new_v4(),
            data_source_id: "src1".into(),
            last_good_sequence: 5,
            first_bad_sequence: 7,
            gap_start: None,
            gap_end: None,
            detected_at: Utc::now(),
            status: GapStatus::Detected,
            recovery_attempts: 0,
            last_error: None,
        };
        assert_eq!(gap.missing_count(), 1);
    }
}
