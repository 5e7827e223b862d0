//! Point lookup cache (spec §4.2, component C2): in-memory dictionaries
//! refreshed from the registry on a schedule and on demand.
//!
//! Grounded on the teacher-wide "immutable snapshot swap" pattern used
//! throughout `dashflow-streaming` for hot-path lookup state: a single
//! writer builds a new snapshot and atomically swaps it in; every reader
//! clones the `Arc` and then reads the frozen snapshot without taking
//! any further lock.

use crate::error::Result;
use crate::registry::PointRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tichain_core::Point;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default refresh interval (spec §4.2: "scheduled every 5 minutes").
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Default)]
struct Snapshot {
    by_id: HashMap<Uuid, Point>,
    by_sequence: HashMap<i64, Point>,
    /// Keyed by `(data_source_id, lowercased name)`; present for both
    /// sequenced and not-yet-sequenced points so name-based registration
    /// coordination keeps working (spec §4.2).
    by_name: HashMap<(String, String), Point>,
    by_source: HashMap<String, Vec<Point>>,
}

fn build_snapshot(points: Vec<Point>) -> Snapshot {
    let mut snap = Snapshot::default();
    for point in points {
        if point.sequence_id > 0 {
            snap.by_sequence.insert(point.sequence_id, point.clone());
        }
        snap.by_name.insert(
            (point.data_source_id.clone(), point.name.to_lowercase()),
            point.clone(),
        );
        snap.by_source
            .entry(point.data_source_id.clone())
            .or_default()
            .push(point.clone());
        snap.by_id.insert(point.id, point);
    }
    snap
}

/// Lock-free-for-readers point lookup cache.
pub struct PointCache {
    registry: Arc<PointRegistry>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl PointCache {
    pub fn new(registry: Arc<PointRegistry>) -> Self {
        Self {
            registry,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Rebuild the snapshot from the registry and swap it in atomically.
    /// Called on startup, on the scheduled interval, and on demand after
    /// auto-registration (spec §4.2 refresh policy).
    pub async fn refresh(&self) -> Result<()> {
        let points = self.registry.list_all().await?;
        let count = points.len();
        let snapshot = Arc::new(build_snapshot(points));
        *self.snapshot.write() = snapshot;
        debug!(points = count, "point lookup cache refreshed");
        Ok(())
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    #[must_use]
    pub fn by_id(&self, id: Uuid) -> Option<Point> {
        self.current().by_id.get(&id).cloned()
    }

    #[must_use]
    pub fn by_sequence(&self, sequence_id: i64) -> Option<Point> {
        self.current().by_sequence.get(&sequence_id).cloned()
    }

    /// Case-insensitive lookup by name within a source; succeeds even
    /// for points that have not yet been assigned a sequence id, so
    /// concurrent auto-registration callers can coordinate on name
    /// (spec §4.2).
    #[must_use]
    pub fn by_name(&self, data_source_id: &str, name: &str) -> Option<Point> {
        self.current()
            .by_name
            .get(&(data_source_id.to_string(), name.to_lowercase()))
            .cloned()
    }

    #[must_use]
    pub fn by_source(&self, data_source_id: &str) -> Vec<Point> {
        self.current()
            .by_source
            .get(data_source_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Spawn a background task that refreshes the cache on
    /// `DEFAULT_REFRESH_INTERVAL` until `self` is dropped. Returns the
    /// task handle so callers can abort it during shutdown.
    pub fn spawn_periodic_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEFAULT_REFRESH_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = cache.refresh().await {
                    warn!(error = %e, "scheduled point cache refresh failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tichain_core::ValueType;
    use chrono::Utc;

    fn point(source: &str, name: &str, seq: i64) -> Point {
        Point {
            id: Uuid::new_v4(),
            sequence_id: seq,
            data_source_id: source.to_string(),
            name: name.to_string(),
            description: None,
            units: None,
            value_type: ValueType::Numeric,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_name_lookup_is_case_insensitive() {
        let snap = build_snapshot(vec![point("src1", "TEMP-1", 1)]);
        assert!(snap.by_name.contains_key(&("src1".to_string(), "temp-1".to_string())));
    }

    #[test]
    fn snapshot_groups_by_source() {
        let snap = build_snapshot(vec![point("src1", "a", 1), point("src1", "b", 2), point("src2", "c", 3)]);
        assert_eq!(snap.by_source.get("src1").unwrap().len(), 2);
        assert_eq!(snap.by_source.get("src2").unwrap().len(), 1);
    }

    #[test]
    fn unsequenced_point_still_name_indexed() {
        let snap = build_snapshot(vec![point("src1", "pending", 0)]);
        assert!(snap
            .by_name
            .contains_key(&("src1".to_string(), "pending".to_string())));
        assert!(snap.by_sequence.is_empty());
    }
}
