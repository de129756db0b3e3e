//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Timestamps are
//! stored as RFC 3339 UTC text.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use ciqsync_types::state::{CursorState, PipelineId, RunRecord, RunStats, RunStatus};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS sync_cursors (
    pipeline TEXT PRIMARY KEY,
    reference_time TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    reference_time TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    expected_count INTEGER NOT NULL DEFAULT 0,
    observed_count INTEGER NOT NULL DEFAULT 0,
    records_loaded INTEGER NOT NULL DEFAULT 0,
    bytes_processed INTEGER NOT NULL DEFAULT 0,
    success_rate REAL,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_pipeline ON sync_runs (pipeline, id);
";

/// Raw `sync_runs` row before timestamp/status decoding.
type RawRunRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
    i64,
    i64,
    i64,
    Option<f64>,
    Option<String>,
);

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| StateError::sqlite("open", e))?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::sqlite("open", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::sqlite("create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn to_text(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn from_text(raw: &str) -> error::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StateError::Corrupt(format!("timestamp '{raw}': {e}")))
    }

    fn to_sql_count(value: u64) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }

    fn from_sql_count(value: i64) -> u64 {
        u64::try_from(value).unwrap_or(0)
    }

    fn decode_run(row: RawRunRow) -> error::Result<RunRecord> {
        let (
            id,
            pipeline,
            status,
            reference_time,
            started_at,
            finished_at,
            expected_count,
            observed_count,
            records_loaded,
            bytes_processed,
            success_rate,
            error_message,
        ) = row;
        let status = RunStatus::parse(&status)
            .ok_or_else(|| StateError::Corrupt(format!("run {id} has status '{status}'")))?;
        Ok(RunRecord {
            id,
            pipeline: PipelineId::new(pipeline),
            status,
            reference_time: Self::from_text(&reference_time)?,
            started_at: Self::from_text(&started_at)?,
            finished_at: finished_at.as_deref().map(Self::from_text).transpose()?,
            stats: RunStats {
                expected_count: Self::from_sql_count(expected_count),
                observed_count: Self::from_sql_count(observed_count),
                records_loaded: Self::from_sql_count(records_loaded),
                bytes_processed: Self::from_sql_count(bytes_processed),
                success_rate,
                error_message,
            },
        })
    }
}

impl StateBackend for SqliteStateBackend {
    fn get_cursor(&self, pipeline: &PipelineId) -> error::Result<Option<CursorState>> {
        let conn = self.lock_conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT reference_time, updated_at FROM sync_cursors WHERE pipeline = ?1",
                [pipeline.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| StateError::sqlite("get_cursor", e))?;

        row.map(|(reference_time, updated_at)| {
            Ok(CursorState {
                reference_time: Self::from_text(&reference_time)?,
                updated_at: Self::from_text(&updated_at)?,
            })
        })
        .transpose()
    }

    fn set_cursor(
        &self,
        pipeline: &PipelineId,
        reference_time: DateTime<Utc>,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_cursors (pipeline, reference_time, updated_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(pipeline) DO UPDATE SET reference_time = ?2, updated_at = ?3",
            rusqlite::params![
                pipeline.as_str(),
                Self::to_text(reference_time),
                Self::to_text(Utc::now()),
            ],
        )
        .map_err(|e| StateError::sqlite("set_cursor", e))?;
        Ok(())
    }

    fn start_run(
        &self,
        pipeline: &PipelineId,
        reference_time: DateTime<Utc>,
    ) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_runs (pipeline, status, reference_time, started_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                pipeline.as_str(),
                RunStatus::Running.as_str(),
                Self::to_text(reference_time),
                Self::to_text(Utc::now()),
            ],
        )
        .map_err(|e| StateError::sqlite("start_run", e))?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sync_runs SET status = ?1, finished_at = ?2, \
             expected_count = ?3, observed_count = ?4, records_loaded = ?5, \
             bytes_processed = ?6, success_rate = ?7, error_message = ?8 \
             WHERE id = ?9",
            rusqlite::params![
                status.as_str(),
                Self::to_text(Utc::now()),
                Self::to_sql_count(stats.expected_count),
                Self::to_sql_count(stats.observed_count),
                Self::to_sql_count(stats.records_loaded),
                Self::to_sql_count(stats.bytes_processed),
                stats.success_rate,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(|e| StateError::sqlite("complete_run", e))?;
        Ok(())
    }

    fn recent_runs(&self, pipeline: &PipelineId, limit: usize) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, pipeline, status, reference_time, started_at, finished_at, \
                 expected_count, observed_count, records_loaded, bytes_processed, \
                 success_rate, error_message \
                 FROM sync_runs WHERE pipeline = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| StateError::sqlite("recent_runs: prepare", e))?;

        let rows = stmt
            .query_map(
                rusqlite::params![pipeline.as_str(), Self::to_sql_count(limit as u64)],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                        row.get(11)?,
                    ))
                },
            )
            .map_err(|e| StateError::sqlite("recent_runs: query", e))?;

        let mut runs = Vec::new();
        for row in rows {
            let raw: RawRunRow = row.map_err(|e| StateError::sqlite("recent_runs: row", e))?;
            runs.push(Self::decode_run(raw)?);
        }
        Ok(runs)
    }
}
