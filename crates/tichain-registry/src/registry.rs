//! Point registry (spec §4.1, component C1): `PostgreSQL`-backed store of
//! registered measurement channels.
//!
//! Grounded on `dashflow-postgres-checkpointer::PostgresCheckpointer`:
//! `tokio_postgres::connect` with a spawned connection-driving task,
//! identifier validation before use in any interpolated SQL, and
//! schema-init-on-construct.

use crate::error::{Error, Result};
use chrono::Utc;
use tichain_core::{Point, PointDefaults, PointPatch, ValueType};
use tokio_postgres::{Client, NoTls};
use tracing::{error, info, warn};
use uuid::Uuid;

fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier("identifier cannot be empty".into()));
    }
    if name.len() > 63 {
        return Err(Error::InvalidIdentifier(format!(
            "identifier '{name}' exceeds maximum length of 63 characters"
        )));
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

/// Point registry: the durable source of truth for point definitions
/// and sequence-id assignment.
pub struct PointRegistry {
    client: Client,
    table_name: String,
}

impl PointRegistry {
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_table_name(connection_string, "tichain_points").await
    }

    pub async fn with_table_name(connection_string: &str, table_name: &str) -> Result<Self> {
        validate_identifier(table_name)?;

        info!(table = table_name, "connecting to point registry database");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to connect to point registry database");
                Error::Connection(e.to_string())
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "point registry connection task ended with error");
            }
        });

        let registry = Self {
            client,
            table_name: table_name.to_string(),
        };
        registry.initialize_schema().await?;
        Ok(registry)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                sequence_id BIGSERIAL UNIQUE,
                data_source_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                units TEXT,
                value_type TEXT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (data_source_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_source ON {table} (data_source_id);
            "#,
            table = self.table_name,
        );
        self.client.batch_execute(&ddl).await.map_err(|e| {
            error!(error = %e, "failed to initialize point registry schema");
            Error::Query(e.to_string())
        })?;
        Ok(())
    }

    fn row_to_point(row: &tokio_postgres::Row) -> Point {
        let value_type: String = row.get("value_type");
        Point {
            id: row.get("id"),
            sequence_id: row.get("sequence_id"),
            data_source_id: row.get("data_source_id"),
            name: row.get("name"),
            description: row.get("description"),
            units: row.get("units"),
            value_type: parse_value_type(&value_type),
            enabled: row.get("enabled"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// `Register(source, name, defaults) -> Point` (spec §4.1). A
    /// unique-constraint race on `(data_source_id, name)` resolves to the
    /// winner via read-after-insert-conflict retry.
    pub async fn register(
        &self,
        data_source_id: &str,
        name: &str,
        defaults: &PointDefaults,
    ) -> Result<Point> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let insert_sql = format!(
            r#"INSERT INTO {table}
                (id, data_source_id, name, description, units, value_type, enabled, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $7)
               ON CONFLICT (data_source_id, name) DO NOTHING
               RETURNING *"#,
            table = self.table_name,
        );
        let rows = self
            .client
            .query(
                &insert_sql,
                &[
                    &id,
                    &data_source_id,
                    &name,
                    &defaults.description,
                    &defaults.units,
                    &value_type_str(defaults.value_type),
                    &now,
                ],
            )
            .await?;

        if let Some(row) = rows.first() {
            return Ok(Self::row_to_point(row));
        }

        // Lost the race: another caller registered this (source, name)
        // first. Read back the winner rather than erroring.
        self.get_by_name(data_source_id, name).await?.ok_or_else(|| {
            Error::Conflict(format!(
                "insert conflicted for ({data_source_id}, {name}) but no row exists on retry"
            ))
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Point>> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", self.table_name);
        let rows = self.client.query(&sql, &[&id]).await?;
        Ok(rows.first().map(Self::row_to_point))
    }

    pub async fn get_by_sequence(&self, sequence_id: i64) -> Result<Option<Point>> {
        let sql = format!("SELECT * FROM {} WHERE sequence_id = $1", self.table_name);
        let rows = self.client.query(&sql, &[&sequence_id]).await?;
        Ok(rows.first().map(Self::row_to_point))
    }

    /// Case-insensitive lookup by `(data_source_id, name)` (spec §4.2: "by
    /// name (case-insensitive)").
    pub async fn get_by_name(&self, data_source_id: &str, name: &str) -> Result<Option<Point>> {
        let sql = format!(
            "SELECT * FROM {} WHERE data_source_id = $1 AND lower(name) = lower($2)",
            self.table_name
        );
        let rows = self.client.query(&sql, &[&data_source_id, &name]).await?;
        Ok(rows.first().map(Self::row_to_point))
    }

    pub async fn list(&self, data_source_id: &str) -> Result<Vec<Point>> {
        let sql = format!(
            "SELECT * FROM {} WHERE data_source_id = $1 ORDER BY sequence_id",
            self.table_name
        );
        let rows = self.client.query(&sql, &[&data_source_id]).await?;
        Ok(rows.iter().map(Self::row_to_point).collect())
    }

    pub async fn list_all(&self) -> Result<Vec<Point>> {
        let sql = format!("SELECT * FROM {} ORDER BY sequence_id", self.table_name);
        let rows = self.client.query(&sql, &[]).await?;
        Ok(rows.iter().map(Self::row_to_point).collect())
    }

    /// `Update(id, patch)`; only fields present in `patch` change.
    pub async fn update(&self, id: Uuid, patch: &PointPatch) -> Result<Point> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let description = patch.description.clone().or(current.description);
        let units = patch.units.clone().or(current.units);
        let value_type = patch.value_type.unwrap_or(current.value_type);
        let enabled = patch.enabled.unwrap_or(current.enabled);

        let sql = format!(
            r#"UPDATE {table} SET description = $1, units = $2, value_type = $3, enabled = $4, updated_at = $5
               WHERE id = $6 RETURNING *"#,
            table = self.table_name,
        );
        let row = self
            .client
            .query_one(
                &sql,
                &[
                    &description,
                    &units,
                    &value_type_str(value_type),
                    &enabled,
                    &Utc::now(),
                    &id,
                ],
            )
            .await?;
        Ok(Self::row_to_point(&row))
    }

    pub async fn health_check(&self) -> Result<()> {
        self.client
            .batch_execute("SELECT 1")
            .await
            .map_err(Error::from)
    }
}

fn value_type_str(v: ValueType) -> &'static str {
    match v {
        ValueType::Numeric => "numeric",
        ValueType::Boolean => "boolean",
        ValueType::Enumerated => "enumerated",
    }
}

fn parse_value_type(s: &str) -> ValueType {
    match s {
        "boolean" => ValueType::Boolean,
        "enumerated" => ValueType::Enumerated,
        other => {
            if other != "numeric" {
                warn!(value_type = other, "unknown value_type in registry row, defaulting to numeric");
            }
            ValueType::Numeric
        }
    }
}
