//! Append-only audit log of backup attempts, stored in SQLite.

use crate::error::{BackupError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS run_log (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  server_id TEXT NOT NULL,
  ts TEXT NOT NULL,
  outcome TEXT NOT NULL CHECK(outcome IN ('success','failure')),
  file_size INTEGER,
  error TEXT,
  note TEXT
);

CREATE INDEX IF NOT EXISTS idx_run_log_server_ts ON run_log(server_id, ts DESC);

CREATE TRIGGER IF NOT EXISTS run_log_no_update BEFORE UPDATE ON run_log
BEGIN
  SELECT RAISE(ABORT, 'run_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS run_log_no_delete BEFORE DELETE ON run_log
BEGIN
  SELECT RAISE(ABORT, 'run_log is append-only');
END;
"#;

const COLUMNS: &str = "id, server_id, ts, outcome, file_size, error, note";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Outcome::Success),
            "failure" => Some(Outcome::Failure),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A record about to be appended.
#[derive(Debug, Clone)]
pub struct RunEntry {
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub file_size: Option<u64>,
    pub error: Option<String>,
    /// Non-fatal observations such as a size anomaly.
    pub note: Option<String>,
}

impl RunEntry {
    pub fn success(server_id: &str, timestamp: DateTime<Utc>, file_size: u64) -> Self {
        Self {
            server_id: server_id.to_string(),
            timestamp,
            outcome: Outcome::Success,
            file_size: Some(file_size),
            error: None,
            note: None,
        }
    }

    pub fn failure(server_id: &str, timestamp: DateTime<Utc>, error: String) -> Self {
        Self {
            server_id: server_id.to_string(),
            timestamp,
            outcome: Outcome::Failure,
            file_size: None,
            error: Some(error),
            note: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub file_size: Option<u64>,
    pub error: Option<String>,
    pub note: Option<String>,
}

impl RunRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let outcome: String = row.get(3)?;
        let outcome = Outcome::parse(&outcome).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown outcome '{}'", outcome).into(),
            )
        })?;
        let file_size: Option<i64> = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            server_id: row.get(1)?,
            timestamp: row.get(2)?,
            outcome,
            file_size: file_size.map(|s| s.max(0) as u64),
            error: row.get(5)?,
            note: row.get(6)?,
        })
    }
}

/// Handle to the run log. Writers only ever append.
pub struct RunHistory {
    conn: Mutex<Connection>,
}

impl RunHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Opening run log at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BackupError::Store("run log connection poisoned".to_string()))
    }

    pub fn record(&self, entry: &RunEntry) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO run_log (server_id, ts, outcome, file_size, error, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.server_id,
                entry.timestamp,
                entry.outcome.as_str(),
                entry.file_size.map(|s| s as i64),
                entry.error,
                entry.note,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(
            "Recorded {} for server '{}' as run #{}",
            entry.outcome, entry.server_id, id
        );
        Ok(id)
    }

    /// Most recent successful attempt for the server, if any.
    pub fn last_success(&self, server_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM run_log WHERE server_id = ?1 AND outcome = 'success'
             ORDER BY ts DESC, id DESC LIMIT 1",
            COLUMNS
        );
        let record = conn
            .query_row(&sql, params![server_id], RunRecord::from_row)
            .optional()?;
        Ok(record)
    }

    /// Newest first.
    pub fn records_for(&self, server_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM run_log WHERE server_id = ?1 ORDER BY ts DESC, id DESC LIMIT ?2",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![server_id, limit as i64], RunRecord::from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count_for(&self, server_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM run_log WHERE server_id = ?1",
            params![server_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Latest record of every server that has one.
    pub fn latest_per_server(&self) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM run_log r
             WHERE r.id = (SELECT id FROM run_log WHERE server_id = r.server_id
                           ORDER BY ts DESC, id DESC LIMIT 1)
             ORDER BY server_id",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], RunRecord::from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_last_success_ignores_failures() {
        let history = RunHistory::in_memory().unwrap();
        let now = Utc::now();

        history
            .record(&RunEntry::success("app", now - Duration::hours(5), 10_000))
            .unwrap();
        history
            .record(&RunEntry::failure("app", now, "dump failed".to_string()))
            .unwrap();

        let last = history.last_success("app").unwrap().unwrap();
        assert_eq!(last.outcome, Outcome::Success);
        assert_eq!(last.file_size, Some(10_000));
        assert_eq!(last.timestamp, now - Duration::hours(5));
        assert!(history.last_success("other").unwrap().is_none());
    }

    #[test]
    fn test_records_are_newest_first() {
        let history = RunHistory::in_memory().unwrap();
        let now = Utc::now();
        for hours in [3, 1, 2] {
            history
                .record(&RunEntry::success("app", now - Duration::hours(hours), hours as u64))
                .unwrap();
        }

        let records = history.records_for("app", 10).unwrap();
        let sizes: Vec<_> = records.iter().map(|r| r.file_size.unwrap()).collect();
        assert_eq!(sizes, vec![1, 2, 3]);
        assert_eq!(history.records_for("app", 2).unwrap().len(), 2);
        assert_eq!(history.count_for("app").unwrap(), 3);
    }

    #[test]
    fn test_log_rejects_update_and_delete() {
        let history = RunHistory::in_memory().unwrap();
        let id = history
            .record(&RunEntry::failure("app", Utc::now(), "boom".to_string()))
            .unwrap();

        let conn = history.conn().unwrap();
        let update = conn.execute(
            "UPDATE run_log SET outcome = 'success' WHERE id = ?1",
            params![id],
        );
        assert!(update.is_err());
        let delete = conn.execute("DELETE FROM run_log WHERE id = ?1", params![id]);
        assert!(delete.is_err());
        drop(conn);

        let records = history.records_for("app", 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].outcome, Outcome::Failure);
        assert_eq!(records[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_latest_per_server() {
        let history = RunHistory::in_memory().unwrap();
        let now = Utc::now();
        history
            .record(&RunEntry::success("a", now - Duration::hours(2), 1))
            .unwrap();
        history
            .record(&RunEntry::failure("a", now, "late".to_string()))
            .unwrap();
        history.record(&RunEntry::success("b", now, 2)).unwrap();

        let latest = history.latest_per_server().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].server_id, "a");
        assert_eq!(latest[0].outcome, Outcome::Failure);
        assert_eq!(latest[1].server_id, "b");
    }

    #[test]
    fn test_open_persists_between_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.sqlite");

        {
            let history = RunHistory::open(&path).unwrap();
            history
                .record(&RunEntry::success("app", Utc::now(), 4096))
                .unwrap();
        }

        let history = RunHistory::open(&path).unwrap();
        assert_eq!(history.count_for("app").unwrap(), 1);
    }
}
