//! SQLite persistence for crossing events.
//!
//! One row per crossing in the `counts` table:
//!
//! ```sql
//! CREATE TABLE counts (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     timestamp DATETIME NOT NULL,   -- "%Y-%m-%d %H:%M:%S", local time
//!     direction TEXT NOT NULL,       -- "IN" | "OUT"
//!     object_id INTEGER NOT NULL
//! );
//! ```
//!
//! Indexes on `timestamp` and `(direction, timestamp)` keep per-day
//! aggregates cheap. The connection runs in WAL mode with a 5 s busy timeout,
//! so readers (reports, dashboards) do not block the writer for long.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode};
use thiserror::Error;
use tracing::{info, warn};

use super::backend::{BackendError, CountsBackend};
use crate::counter::CrossingCounts;
use crate::event::{CrossingEvent, Direction};

/// How long SQLite waits on a locked database before reporting busy.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS counts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp DATETIME NOT NULL,
        direction TEXT NOT NULL,
        object_id INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_counts_timestamp
        ON counts(timestamp);
    CREATE INDEX IF NOT EXISTS idx_counts_direction_timestamp
        ON counts(direction, timestamp);
";

const INSERT_COUNT: &str =
    "INSERT INTO counts (timestamp, direction, object_id) VALUES (?1, ?2, ?3)";

/// Errors from database maintenance and report queries.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to create the database directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// SQLite reported an error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The connection was already released.
    #[error("database connection is closed")]
    Closed,
}

/// A persisted `counts` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCount {
    pub id: i64,
    pub timestamp: String,
    pub direction: String,
    pub object_id: i64,
}

/// Map a SQLite error to the store's retry classification.
///
/// Busy and locked databases are contention and worth retrying.
pub fn classify_error(err: rusqlite::Error) -> BackendError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            BackendError::Transient(err.to_string())
        }
        _ => BackendError::Fatal(err.to_string()),
    }
}

/// SQLite-backed counts table.
pub struct SqliteBackend {
    path: PathBuf,
    conn: Option<Connection>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %path.display(),
            journal_mode = %journal_mode,
            "Database initialized"
        );

        Ok(Self {
            path: path.to_path_buf(),
            conn: Some(conn),
        })
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection, StorageError> {
        self.conn.as_ref().ok_or(StorageError::Closed)
    }

    /// IN/OUT totals for one local calendar day.
    ///
    /// Rows with an unrecognized direction are skipped with a warning.
    pub fn daily_totals(&self, date: NaiveDate) -> Result<CrossingCounts, StorageError> {
        let start = format!("{} 00:00:00", date.format("%Y-%m-%d"));
        let end = match date.succ_opt() {
            Some(next) => format!("{} 00:00:00", next.format("%Y-%m-%d")),
            None => "9999-12-31 23:59:59".to_string(),
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT direction, COUNT(*) FROM counts \
             WHERE timestamp >= ?1 AND timestamp < ?2 \
             GROUP BY direction",
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut totals = CrossingCounts::default();
        for row in rows {
            let (direction, count) = row?;
            let count = u64::try_from(count).unwrap_or(0);
            match direction.parse::<Direction>() {
                Ok(Direction::In) => totals.in_count = count,
                Ok(Direction::Out) => totals.out_count = count,
                Err(e) => warn!(error = %e, "Skipping unknown direction in counts table"),
            }
        }
        Ok(totals)
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> Result<Vec<StoredCount>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, direction, object_id FROM counts ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredCount {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    direction: row.get(2)?,
                    object_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Names of the indexes on `counts`.
    pub fn index_names(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'index' AND tbl_name = 'counts' AND name LIKE 'idx_counts_%' \
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Delete every row and restart the id sequence. Returns the number of rows removed.
    pub fn reset(&mut self) -> Result<usize, StorageError> {
        let conn = self.conn.as_mut().ok_or(StorageError::Closed)?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM counts", [])?;
        tx.execute("DELETE FROM sqlite_sequence WHERE name = 'counts'", [])?;
        tx.commit()?;

        info!(path = %self.path.display(), removed, "Counts table reset");
        Ok(removed)
    }
}

impl CountsBackend for SqliteBackend {
    fn insert_batch(&mut self, batch: &[CrossingEvent]) -> Result<(), BackendError> {
        let conn = self.conn.as_mut().ok_or(BackendError::Closed)?;
        let tx = conn.transaction().map_err(classify_error)?;
        {
            let mut stmt = tx.prepare_cached(INSERT_COUNT).map_err(classify_error)?;
            for event in batch {
                stmt.execute(params![
                    event.timestamp(),
                    event.direction.as_str(),
                    event.object_id
                ])
                .map_err(classify_error)?;
            }
        }
        tx.commit().map_err(classify_error)
    }

    fn close(&mut self) -> Result<(), BackendError> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| classify_error(e)),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
