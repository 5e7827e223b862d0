//! Embedded, crash-durable storage for the shadow buffer.
//!
//! Grounded on `dashflow-streaming::backends::sqlite`: a dedicated
//! blocking worker thread owns the (non-`Send`) `rusqlite::Connection`;
//! callers talk to it over an `mpsc`/`oneshot` command channel. WAL mode
//! plus `synchronous=NORMAL` gives crash-durable commits without forcing
//! a full fsync per row, matching the teacher's durability/throughput
//! trade-off.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use tichain_core::ShadowEntry;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Aggregate statistics returned by `Stats()` (spec §4.3).
#[derive(Debug, Clone)]
pub struct ShadowStats {
    pub data_source_id: String,
    pub total_entries: u64,
    pub unconfirmed_entries: u64,
    pub storage_bytes: u64,
    pub oldest_buffered_at: Option<DateTime<Utc>>,
    pub newest_buffered_at: Option<DateTime<Utc>>,
}

enum Command {
    Buffer {
        entry: Box<ShadowEntry>,
        resp: oneshot::Sender<Result<Uuid>>,
    },
    Confirm {
        shadow_id: Uuid,
        resp: oneshot::Sender<Result<()>>,
    },
    AttachChainEntry {
        shadow_id: Uuid,
        chain_entry_id: Uuid,
        resp: oneshot::Sender<Result<()>>,
    },
    GetUnconfirmed {
        source: String,
        since: DateTime<Utc>,
        resp: oneshot::Sender<Result<Vec<ShadowEntry>>>,
    },
    GetForRecovery {
        source: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resp: oneshot::Sender<Result<Vec<ShadowEntry>>>,
    },
    PurgeExpired {
        retention: chrono::Duration,
        resp: oneshot::Sender<Result<u64>>,
    },
    Stats {
        source: String,
        resp: oneshot::Sender<Result<ShadowStats>>,
    },
    Health {
        resp: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Handle to the shadow buffer store.
#[derive(Clone)]
pub struct ShadowStore {
    tx: mpsc::Sender<Command>,
}

impl ShadowStore {
    pub async fn open(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::start(Some(path.into())).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::start(None).await
    }

    async fn start(path: Option<std::path::PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::channel(256);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        tokio::task::spawn_blocking(move || worker_main(path, rx, ready_tx));
        ready_rx.await.map_err(|_| Error::WorkerUnavailable)??;
        Ok(Self { tx })
    }

    async fn call<T>(&self, f: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(f(resp_tx))
            .await
            .map_err(|_| Error::WorkerUnavailable)?;
        resp_rx.await.map_err(|_| Error::WorkerUnavailable)?
    }

    /// `Buffer(batch, source) -> shadow-id` (spec §4.3). Must be
    /// crash-durable before returning, so it is serialized through the
    /// worker's single synchronous `INSERT`.
    pub async fn buffer(&self, entry: ShadowEntry) -> Result<Uuid> {
        self.call(|resp| Command::Buffer {
            entry: Box::new(entry),
            resp,
        })
        .await
    }

    /// `Confirm(shadow-id)`.
    pub async fn confirm(&self, shadow_id: Uuid) -> Result<()> {
        self.call(|resp| Command::Confirm { shadow_id, resp }).await
    }

    /// Link an already-buffered shadow entry to the chain entry created
    /// for the same batch (spec §4.12 step 2 happens after step 1, so
    /// this is a follow-up update rather than part of the initial insert).
    pub async fn attach_chain_entry(&self, shadow_id: Uuid, chain_entry_id: Uuid) -> Result<()> {
        self.call(|resp| Command::AttachChainEntry {
            shadow_id,
            chain_entry_id,
            resp,
        })
        .await
    }

    /// `GetUnconfirmed(source, since) -> [ShadowEntry]` ordered by
    /// `buffered_at`.
    pub async fn get_unconfirmed(
        &self,
        source: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ShadowEntry>> {
        self.call(|resp| Command::GetUnconfirmed {
            source: source.to_string(),
            since,
            resp,
        })
        .await
    }

    /// `GetForRecovery(source, from, to) -> [ShadowEntry]` ordered by
    /// `min_ts`.
    pub async fn get_for_recovery(
        &self,
        source: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ShadowEntry>> {
        self.call(|resp| Command::GetForRecovery {
            source: source.to_string(),
            from,
            to,
            resp,
        })
        .await
    }

    /// `PurgeExpired(retention)`: deletes only confirmed entries older
    /// than `retention`. Returns the number of rows deleted.
    pub async fn purge_expired(&self, retention: chrono::Duration) -> Result<u64> {
        self.call(|resp| Command::PurgeExpired { retention, resp })
            .await
    }

    /// `Stats()` for `source`.
    pub async fn stats(&self, source: &str) -> Result<ShadowStats> {
        self.call(|resp| Command::Stats {
            source: source.to_string(),
            resp,
        })
        .await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.call(|resp| Command::Health { resp }).await
    }
}

impl Drop for ShadowStore {
    fn drop(&mut self) {
        let _ = self.tx.try_send(Command::Close);
    }
}

fn ts_to_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

fn opt_ts_to_str(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(ts_to_str)
}

fn str_to_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn opt_str_to_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn worker_main(
    path: Option<std::path::PathBuf>,
    mut rx: mpsc::Receiver<Command>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let conn = match path {
        Some(p) => rusqlite::Connection::open(p),
        None => rusqlite::Connection::open_in_memory(),
    };
    let conn = match conn {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(Error::Database(e.to_string())));
            return;
        }
    };

    let init = conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS shadow_entries (
            shadow_id TEXT PRIMARY KEY,
            data_source_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            chain_entry_id TEXT,
            point_count INTEGER NOT NULL,
            payload BLOB NOT NULL,
            compressed INTEGER NOT NULL,
            buffered_at TEXT NOT NULL,
            confirmed_at TEXT,
            min_ts TEXT,
            max_ts TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_shadow_source_confirmed
            ON shadow_entries(data_source_id, confirmed_at);
        CREATE INDEX IF NOT EXISTS idx_shadow_source_minmax
            ON shadow_entries(data_source_id, min_ts, max_ts);
        "#,
    );
    if let Err(e) = init {
        let _ = ready_tx.send(Err(Error::Database(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            Command::Buffer { entry, resp } => {
                let result = handle_buffer(&conn, &entry);
                let _ = resp.send(result);
            }
            Command::Confirm { shadow_id, resp } => {
                let result = handle_confirm(&conn, shadow_id);
                let _ = resp.send(result);
            }
            Command::AttachChainEntry {
                shadow_id,
                chain_entry_id,
                resp,
            } => {
                let result = handle_attach_chain_entry(&conn, shadow_id, chain_entry_id);
                let _ = resp.send(result);
            }
            Command::GetUnconfirmed {
                source,
                since,
                resp,
            } => {
                let result = get_unconfirmed(&conn, &source, since);
                let _ = resp.send(result);
            }
            Command::GetForRecovery {
                source,
                from,
                to,
                resp,
            } => {
                let result = get_for_recovery(&conn, &source, from, to);
                let _ = resp.send(result);
            }
            Command::PurgeExpired { retention, resp } => {
                let result = purge_expired(&conn, retention);
                let _ = resp.send(result);
            }
            Command::Stats { source, resp } => {
                let result = stats(&conn, &source);
                let _ = resp.send(result);
            }
            Command::Health { resp } => {
                let result = conn
                    .execute_batch("SELECT 1")
                    .map_err(|e| Error::Database(e.to_string()));
                let _ = resp.send(result);
            }
            Command::Close => break,
        }
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShadowEntry> {
    let shadow_id: String = row.get("shadow_id")?;
    let data_source_id: String = row.get("data_source_id")?;
    let batch_id: String = row.get("batch_id")?;
    let chain_entry_id: Option<String> = row.get("chain_entry_id")?;
    let point_count: i64 = row.get("point_count")?;
    let payload: Vec<u8> = row.get("payload")?;
    let compressed: i64 = row.get("compressed")?;
    let buffered_at: String = row.get("buffered_at")?;
    let confirmed_at: Option<String> = row.get("confirmed_at")?;
    let min_ts: Option<String> = row.get("min_ts")?;
    let max_ts: Option<String> = row.get("max_ts")?;

    Ok(ShadowEntry {
        shadow_id: Uuid::parse_str(&shadow_id).unwrap_or_default(),
        data_source_id,
        batch_id,
        chain_entry_id: chain_entry_id.and_then(|s| Uuid::parse_str(&s).ok()),
        point_count: point_count as usize,
        payload,
        compressed: compressed != 0,
        buffered_at: str_to_ts(&buffered_at),
        confirmed_at: opt_str_to_ts(confirmed_at),
        min_ts: opt_str_to_ts(min_ts),
        max_ts: opt_str_to_ts(max_ts),
    })
}

fn handle_buffer(conn: &rusqlite::Connection, entry: &ShadowEntry) -> Result<Uuid> {
    conn.execute(
        r#"INSERT INTO shadow_entries
            (shadow_id, data_source_id, batch_id, chain_entry_id, point_count, payload,
             compressed, buffered_at, confirmed_at, min_ts, max_ts)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10)"#,
        rusqlite::params![
            entry.shadow_id.to_string(),
            entry.data_source_id,
            entry.batch_id,
            entry.chain_entry_id.map(|id| id.to_string()),
            entry.point_count as i64,
            entry.payload,
            i64::from(entry.compressed),
            ts_to_str(entry.buffered_at),
            opt_ts_to_str(entry.min_ts),
            opt_ts_to_str(entry.max_ts),
        ],
    )
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(entry.shadow_id)
}

fn handle_confirm(conn: &rusqlite::Connection, shadow_id: Uuid) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE shadow_entries SET confirmed_at = ?1 WHERE shadow_id = ?2 AND confirmed_at IS NULL",
            rusqlite::params![ts_to_str(Utc::now()), shadow_id.to_string()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
    if updated == 0 {
        // Either already confirmed (idempotent no-op, fine for at-least-once
        // recovery reconciliation) or unknown; disambiguate by existence.
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM shadow_entries WHERE shadow_id = ?1",
                [shadow_id.to_string()],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !exists {
            return Err(Error::NotFound(shadow_id));
        }
    }
    Ok(())
}

fn handle_attach_chain_entry(
    conn: &rusqlite::Connection,
    shadow_id: Uuid,
    chain_entry_id: Uuid,
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE shadow_entries SET chain_entry_id = ?1 WHERE shadow_id = ?2",
            rusqlite::params![chain_entry_id.to_string(), shadow_id.to_string()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
    if updated == 0 {
        return Err(Error::NotFound(shadow_id));
    }
    Ok(())
}

fn get_unconfirmed(
    conn: &rusqlite::Connection,
    source: &str,
    since: DateTime<Utc>,
) -> Result<Vec<ShadowEntry>> {
    let mut stmt = conn
        .prepare(
            r#"SELECT * FROM shadow_entries
               WHERE data_source_id = ?1 AND confirmed_at IS NULL AND buffered_at >= ?2
               ORDER BY buffered_at ASC"#,
        )
        .map_err(|e| Error::Database(e.to_string()))?;
    collect(stmt.query_map(rusqlite::params![source, ts_to_str(since)], row_to_entry))
}

fn get_for_recovery(
    conn: &rusqlite::Connection,
    source: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<ShadowEntry>> {
    let mut stmt = conn
        .prepare(
            r#"SELECT * FROM shadow_entries
               WHERE data_source_id = ?1 AND min_ts >= ?2 AND max_ts <= ?3
               ORDER BY min_ts ASC"#,
        )
        .map_err(|e| Error::Database(e.to_string()))?;
    collect(stmt.query_map(
        rusqlite::params![source, ts_to_str(from), ts_to_str(to)],
        row_to_entry,
    ))
}

fn collect(
    rows: rusqlite::Result<rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<ShadowEntry>>>,
) -> Result<Vec<ShadowEntry>> {
    let rows = rows.map_err(|e| Error::Database(e.to_string()))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| Error::Database(e.to_string()))?);
    }
    Ok(out)
}

fn purge_expired(conn: &rusqlite::Connection, retention: chrono::Duration) -> Result<u64> {
    let cutoff = Utc::now() - retention;
    let deleted = conn
        .execute(
            "DELETE FROM shadow_entries WHERE confirmed_at IS NOT NULL AND confirmed_at < ?1",
            [ts_to_str(cutoff)],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
    Ok(deleted as u64)
}

fn stats(conn: &rusqlite::Connection, source: &str) -> Result<ShadowStats> {
    let (total, unconfirmed, storage_bytes): (i64, i64, i64) = conn
        .query_row(
            r#"SELECT COUNT(*), SUM(CASE WHEN confirmed_at IS NULL THEN 1 ELSE 0 END),
                      COALESCE(SUM(LENGTH(payload)), 0)
               FROM shadow_entries WHERE data_source_id = ?1"#,
            [source],
            |row| Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0), row.get(2)?)),
        )
        .map_err(|e| Error::Database(e.to_string()))?;

    let oldest: Option<String> = conn
        .query_row(
            "SELECT MIN(buffered_at) FROM shadow_entries WHERE data_source_id = ?1",
            [source],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(e.to_string()))?;
    let newest: Option<String> = conn
        .query_row(
            "SELECT MAX(buffered_at) FROM shadow_entries WHERE data_source_id = ?1",
            [source],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(e.to_string()))?;

    Ok(ShadowStats {
        data_source_id: source.to_string(),
        total_entries: total as u64,
        unconfirmed_entries: unconfirmed as u64,
        storage_bytes: storage_bytes as u64,
        oldest_buffered_at: oldest.map(|s| str_to_ts(&s)),
        newest_buffered_at: newest.map(|s| str_to_ts(&s)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tichain_core::{DataPoint, DataPointBatch, Quality};

    fn sample_entry(source: &str, min_ts: DateTime<Utc>, max_ts: DateTime<Utc>) -> ShadowEntry {
        let batch = DataPointBatch {
            batch_id: Uuid::new_v4().to_string(),
            data_source_id: source.to_string(),
            created_at: Utc::now(),
            points: vec![DataPoint {
                sequence_id: 1,
                point_name: "TEMP".into(),
                timestamp: min_ts,
                value: 1.0,
                quality: Quality::Good,
                source_address: None,
            }],
        };
        let bytes = serde_json::to_vec(&batch).unwrap();
        let compressed = tichain_core::compression::compress(&bytes, 3).unwrap();
        ShadowEntry {
            shadow_id: Uuid::new_v4(),
            data_source_id: source.to_string(),
            batch_id: batch.batch_id,
            chain_entry_id: None,
            point_count: 1,
            payload: compressed,
            compressed: true,
            buffered_at: Utc::now(),
            confirmed_at: None,
            min_ts: Some(min_ts),
            max_ts: Some(max_ts),
        }
    }

    #[tokio::test]
    async fn buffer_then_confirm_removes_from_unconfirmed() {
        let store = ShadowStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        let entry = sample_entry("src1", now, now);
        let id = store.buffer(entry).await.unwrap();

        let unconfirmed = store
            .get_unconfirmed("src1", now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(unconfirmed.len(), 1);

        store.confirm(id).await.unwrap();
        let unconfirmed = store
            .get_unconfirmed("src1", now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(unconfirmed.is_empty());
    }

    #[tokio::test]
    async fn confirm_unknown_id_errors() {
        let store = ShadowStore::open_in_memory().await.unwrap();
        assert!(store.confirm(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn attach_chain_entry_round_trips() {
        let store = ShadowStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        let id = store.buffer(sample_entry("src1", now, now)).await.unwrap();
        let chain_entry_id = Uuid::new_v4();

        store.attach_chain_entry(id, chain_entry_id).await.unwrap();

        let unconfirmed = store
            .get_unconfirmed("src1", now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(unconfirmed[0].chain_entry_id, Some(chain_entry_id));
    }

    #[tokio::test]
    async fn attach_chain_entry_unknown_id_errors() {
        let store = ShadowStore::open_in_memory().await.unwrap();
        assert!(store.attach_chain_entry(Uuid::new_v4(), Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn get_for_recovery_orders_by_min_ts() {
        let store = ShadowStore::open_in_memory().await.unwrap();
        let t0 = Utc::now() - chrono::Duration::minutes(10);
        let t1 = Utc::now() - chrono::Duration::minutes(5);
        store.buffer(sample_entry("src1", t1, t1)).await.unwrap();
        store.buffer(sample_entry("src1", t0, t0)).await.unwrap();

        let recovered = store
            .get_for_recovery("src1", t0 - chrono::Duration::minutes(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(recovered.len(), 2);
        assert!(recovered[0].min_ts.unwrap() <= recovered[1].min_ts.unwrap());
    }

    #[tokio::test]
    async fn purge_expired_only_touches_confirmed() {
        let store = ShadowStore::open_in_memory().await.unwrap();
        let old = Utc::now() - chrono::Duration::days(10);
        let id = store.buffer(sample_entry("src1", old, old)).await.unwrap();
        store.confirm(id).await.unwrap();
        // Backdate confirmed_at directly isn't exposed; purge with zero
        // retention instead, which still exercises "confirmed-only" by
        // pairing with an unconfirmed entry that must survive.
        let unconfirmed_id = store.buffer(sample_entry("src1", old, old)).await.unwrap();

        let deleted = store.purge_expired(chrono::Duration::zero()).await.unwrap();
        assert_eq!(deleted, 1);

        let stats = store.stats("src1").await.unwrap();
        assert_eq!(stats.total_entries, 1);
        let unconfirmed = store
            .get_unconfirmed("src1", old - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(unconfirmed.len(), 1);
        assert_eq!(unconfirmed[0].shadow_id, unconfirmed_id);
    }

    #[tokio::test]
    async fn stats_report_totals() {
        let store = ShadowStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        store.buffer(sample_entry("src1", now, now)).await.unwrap();
        store.buffer(sample_entry("src1", now, now)).await.unwrap();
        let stats = store.stats("src1").await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.unconfirmed_entries, 2);
        assert!(stats.storage_bytes > 0);
    }
}
