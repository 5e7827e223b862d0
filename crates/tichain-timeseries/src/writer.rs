//! Time-series writer (spec §4.8, component C8): appends points to a
//! columnar, time-partitioned store.
//!
//! Grounded on `dashflow-clickhouse::ClickHouseVectorStore`:
//! `Client::default().with_url(..)`, identifier validation before any
//! interpolated DDL, and schema-init-on-construct, generalized from a
//! vector-embedding table to an append-only points table.

use crate::error::{classify_clickhouse_error, Error, Result};
use clickhouse::{Client, Row};
use serde::Serialize;
use tichain_core::{DataPointBatch, Quality};
use tracing::warn;

fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier("identifier cannot be empty".into()));
    }
    let mut chars = name.chars();
    let first = chars.next().expect("checked non-empty above");
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::InvalidIdentifier(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::InvalidIdentifier(format!(
                "identifier '{name}' contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

fn quality_str(q: Quality) -> &'static str {
    match q {
        Quality::Good => "good",
        Quality::Uncertain => "uncertain",
        Quality::Bad => "bad",
        Quality::Substituted => "substituted",
    }
}

#[derive(Debug, Clone, Row, Serialize)]
struct PointRow {
    sequence_id: i64,
    /// RFC3339 nanosecond timestamp; stored as text so the column format
    /// exactly matches the canonical chain-hashing representation
    /// (spec §4.4) used elsewhere in the platform.
    timestamp: String,
    value: f64,
    quality: String,
    data_source_id: String,
    batch_id: String,
}

/// Appends `DataPointBatch`es to ClickHouse (spec §4.8).
pub struct TimeSeriesWriter {
    client: Client,
    table: String,
}

impl TimeSeriesWriter {
    pub async fn new(url: &str, database: &str) -> Result<Self> {
        Self::with_table(url, database, "points").await
    }

    pub async fn with_table(url: &str, database: &str, table: &str) -> Result<Self> {
        validate_identifier(database)?;
        validate_identifier(table)?;

        let client = Client::default().with_url(url).with_database(database);
        let writer = Self {
            client,
            table: table.to_string(),
        };
        writer.ensure_table().await?;
        Ok(writer)
    }

    async fn ensure_table(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                sequence_id Int64,
                timestamp String,
                value Float64,
                quality String,
                data_source_id String,
                batch_id String
            ) ENGINE = MergeTree()
            ORDER BY (sequence_id, timestamp)",
            table = self.table,
        );
        self.client
            .query(&ddl)
            .execute()
            .await
            .map_err(classify_clickhouse_error)
    }

    /// `Write(enriched-batch)` (spec §4.8, §4.10 step 6).
    ///
    /// Points whose `sequence_id` is still unresolved, or whose value is
    /// non-finite, are dropped with a warning rather than written (spec
    /// §4.8(b), §4.10 step 5c); both should already have been filtered
    /// upstream, so this is a defensive last line, not the primary path.
    pub async fn write(&self, batch: &DataPointBatch) -> Result<()> {
        let mut insert = self
            .client
            .insert(&self.table)
            .map_err(classify_clickhouse_error)?;

        let mut written = 0usize;
        for point in &batch.points {
            if point.sequence_id <= 0 {
                warn!(point_name = %point.point_name, batch_id = %batch.batch_id, "dropping unresolved point at write time");
                continue;
            }
            if !point.value.is_finite() {
                warn!(sequence_id = point.sequence_id, batch_id = %batch.batch_id, "dropping non-finite value at write time");
                continue;
            }
            let row = PointRow {
                sequence_id: point.sequence_id,
                timestamp: point.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
                value: point.value,
                quality: quality_str(point.quality).to_string(),
                data_source_id: batch.data_source_id.clone(),
                batch_id: batch.batch_id.clone(),
            };
            insert.write(&row).await.map_err(classify_clickhouse_error)?;
            written += 1;
        }

        insert.end().await.map_err(classify_clickhouse_error)?;
        tracing::debug!(written, batch_id = %batch.batch_id, "time-series batch written");
        Ok(())
    }

    /// Flush-on-demand (spec §4.8): ClickHouse inserts already flush on
    /// `insert.end()`, so this simply verifies connectivity.
    pub async fn flush(&self) -> Result<()> {
        self.health_check().await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(classify_clickhouse_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_rejects_leading_digit() {
        assert!(validate_identifier("1table").is_err());
    }

    #[test]
    fn identifier_accepts_underscore_prefixed() {
        assert!(validate_identifier("_points").is_ok());
    }
}
