//! Idempotency store (spec §4.7, component C7): a durable, TTL'd set of
//! processed batch ids that survives consumer restarts.
//!
//! Grounded on `dashflow-redis-checkpointer::RedisCheckpointer`: a
//! `redis::aio::ConnectionManager` held behind a configurable key prefix,
//! with domain errors converted from `RedisError` rather than leaking the
//! raw client error type.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

/// TTL for an idempotency record. Must exceed the broker's maximum
/// possible redelivery window (spec §4.7), chosen generously above any
/// plausible consumer-restart-and-catch-up duration.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Durable, TTL'd record of processed batch ids.
pub struct IdempotencyStore {
    connection_manager: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
}

impl IdempotencyStore {
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_options(connection_string, "tichain:idempotency", DEFAULT_TTL).await
    }

    pub async fn with_options(
        connection_string: &str,
        key_prefix: &str,
        ttl: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(connection_string)
            .map_err(|e| Error::Connection(e.to_string()))?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        debug!(prefix = key_prefix, ttl_secs = ttl.as_secs(), "idempotency store connected");

        Ok(Self {
            connection_manager,
            key_prefix: key_prefix.to_string(),
            ttl,
        })
    }

    fn key(&self, batch_id: &str) -> String {
        format!("{}:{}", self.key_prefix, batch_id)
    }

    /// `Check(batch-id) -> (duplicate?, processed-at?)` (spec §4.7).
    pub async fn check(&self, batch_id: &str) -> Result<(bool, Option<DateTime<Utc>>)> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn.get(self.key(batch_id)).await?;
        match value {
            None => Ok((false, None)),
            Some(raw) => {
                let processed_at = DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok();
                Ok((true, processed_at))
            }
        }
    }

    /// `MarkProcessed(batch-id)`. Uses `SET ... NX` so two callers racing
    /// on the same batch id converge on the first writer's timestamp
    /// (spec §4.10 tie-break: "no retries visible to the caller").
    pub async fn mark_processed(&self, batch_id: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let now = Utc::now().to_rfc3339();
        let ttl_secs = self.ttl.as_secs();
        let _: () = redis::cmd("SET")
            .arg(self.key(batch_id))
            .arg(&now)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("idempotency store health check passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DEFAULT_TTL;

    #[test]
    fn default_ttl_exceeds_a_day() {
        assert!(DEFAULT_TTL.as_secs() >= 24 * 60 * 60);
    }
}
