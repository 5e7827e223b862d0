//! Deterministic serialization for chain hashing (spec §4.4: "canonical
//! serialization rules must be deterministic across platforms: stable
//! field ordering, RFC3339 timestamps, fixed-precision numbers").
//!
//! Grounded on `dashflow-streaming::codec`'s insistence on a single,
//! documented encode path shared by every producer/consumer so hashes
//! computed on either side of the wire always agree.

use crate::model::DataPointBatch;
use crate::quality::Quality;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A point rendered with fixed-precision fields, used only for hashing.
/// Field order is fixed by struct declaration order (serde_json preserves
/// it via `preserve_order`-free default map, but struct fields always
/// serialize in declaration order regardless of feature flags).
#[derive(Serialize)]
struct CanonicalPoint {
    sequence_id: i64,
    point_name: String,
    /// RFC3339 with nanosecond precision, always UTC ("Z" suffix).
    timestamp: String,
    /// Rendered with a fixed number of decimal digits so that platform
    /// float-formatting differences cannot change the hash.
    value: String,
    quality: Quality,
}

const FIXED_DECIMALS: usize = 9;

fn canonical_points(batch: &DataPointBatch) -> Vec<CanonicalPoint> {
    batch
        .points
        .iter()
        .map(|p| CanonicalPoint {
            sequence_id: p.sequence_id,
            point_name: p.point_name.clone(),
            timestamp: p.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            value: format!("{:.*}", FIXED_DECIMALS, p.value),
            quality: p.quality,
        })
        .collect()
}

/// Canonical byte representation of a batch's points, used as the
/// pre-image for `data_hash` (spec §3 ChainEntry).
///
/// # Errors
/// Returns an error only if serialization of an already-validated batch
/// fails, which should not happen in practice.
pub fn canonical_batch_bytes(batch: &DataPointBatch) -> crate::error::Result<Vec<u8>> {
    let points = canonical_points(batch);
    Ok(serde_json::to_vec(&points)?)
}

/// sha256 of arbitrary bytes, hex-encoded.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataPoint;
    use chrono::Utc;

    fn batch() -> DataPointBatch {
        DataPointBatch {
            batch_id: "b1".into(),
            data_source_id: "src1".into(),
            created_at: Utc::now(),
            points: vec![DataPoint {
                sequence_id: 1,
                point_name: "TEMP".into(),
                timestamp: Utc::now(),
                value: 21.5,
                quality: Quality::Good,
                source_address: None,
            }],
        }
    }

    #[test]
    fn canonicalization_is_deterministic() {
        let b = batch();
        let a1 = canonical_batch_bytes(&b).unwrap();
        let a2 = canonical_batch_bytes(&b).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(sha256_hex(&a1), sha256_hex(&a2));
    }

    #[test]
    fn different_batches_hash_differently() {
        let mut b = batch();
        let h1 = sha256_hex(&canonical_batch_bytes(&b).unwrap());
        b.points[0].value = 22.0;
        let h2 = sha256_hex(&canonical_batch_bytes(&b).unwrap());
        assert_ne!(h1, h2);
    }
}
