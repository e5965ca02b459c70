//! Telemetry Store
//!
//! SQLite table keyed by client identifier. Durability is relaxed
//! (`synchronous=OFF`): the last few records may be lost on a crash.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::TelemetryError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS clients (
    client_id TEXT NOT NULL PRIMARY KEY,
    reported_version TEXT NOT NULL,
    observed_at INTEGER NOT NULL
);";

const UPSERT: &str = "INSERT INTO clients (client_id, reported_version, observed_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT(client_id) DO UPDATE SET
        reported_version = excluded.reported_version,
        observed_at = excluded.observed_at";

/// One client's self-reported version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub client_id: String,
    pub reported_version: String,
    pub observed_at: i64,
}

impl TelemetryRecord {
    /// Record observed now.
    pub fn now(client_id: impl Into<String>, reported_version: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            reported_version: reported_version.into(),
            observed_at: chrono::Utc::now().timestamp(),
        }
    }
}

pub struct TelemetryStore {
    conn: Connection,
}

impl TelemetryStore {
    pub fn open(path: &Path) -> Result<Self, TelemetryError> {
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!("Telemetry store opened at {:?}", path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, TelemetryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, TelemetryError> {
        // In-memory databases answer "memory" here; that is fine.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert or replace a client's record.
    pub fn upsert(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        self.conn.execute(
            UPSERT,
            params![record.client_id, record.reported_version, record.observed_at],
        )?;
        Ok(())
    }

    /// Upsert a batch in one transaction, in order; later records for the
    /// same client win.
    pub fn upsert_batch(&mut self, records: &[TelemetryRecord]) -> Result<usize, TelemetryError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for record in records {
                stmt.execute(params![
                    record.client_id,
                    record.reported_version,
                    record.observed_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn get(&self, client_id: &str) -> Result<Option<TelemetryRecord>, TelemetryError> {
        let record = self
            .conn
            .query_row(
                "SELECT client_id, reported_version, observed_at FROM clients WHERE client_id = ?1",
                params![client_id],
                |row| {
                    Ok(TelemetryRecord {
                        client_id: row.get(0)?,
                        reported_version: row.get(1)?,
                        observed_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> Result<u64, TelemetryError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
