//! Process-wide health state (spec §6, §7): "health endpoint reports last
//! error and whether errors are recent (within 5 minutes)".

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

const RECENT_WINDOW: Duration = Duration::minutes(5);

struct Inner {
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
}

/// Shared handle recording the most recent error seen by any pipeline
/// worker, surfaced over `/healthz`. Cloning shares the same underlying
/// state (cheap `Arc` clone), mirroring the teacher's snapshot-cache
/// pattern used elsewhere for hot-path shared state.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<Inner>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                last_error: None,
                last_error_at: None,
            })),
        }
    }
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.last_error = Some(message.into());
        inner.last_error_at = Some(Utc::now());
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthReport {
        let inner = self.inner.read();
        let recent = inner
            .last_error_at
            .is_some_and(|at| Utc::now() - at < RECENT_WINDOW);
        HealthReport {
            status: if recent { "degraded" } else { "ok" },
            last_error: inner.last_error.clone(),
            recent_error: recent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub last_error: Option<String>,
    pub recent_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_reports_ok() {
        let state = HealthState::new();
        let report = state.snapshot();
        assert_eq!(report.status, "ok");
        assert!(!report.recent_error);
    }

    #[test]
    fn recorded_error_is_recent() {
        let state = HealthState::new();
        state.record_error("boom");
        let report = state.snapshot();
        assert_eq!(report.status, "degraded");
        assert!(report.recent_error);
        assert_eq!(report.last_error.as_deref(), Some("boom"));
    }
}
