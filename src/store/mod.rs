//! Storage Engine
//!
//! A single-writer SQLite store: WAL journal, foreign keys enforced,
//! `busy_timeout` on every connection, and a process-wide writer lock held
//! for the lifetime of a write transaction. Readers open their own
//! read-only connections for file-backed databases; in-memory databases
//! route reads through the writer connection.

pub mod audit_repo;
pub mod backup;
pub mod kpi_repo;
pub mod ledger_repo;
pub mod lots_repo;
pub mod migrations;
pub mod orders_repo;
pub mod receiving_repo;
pub mod sales_repo;
pub mod settings_repo;
pub mod sku_repo;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};

/// Dates are persisted as ISO-8601 text.
pub(crate) fn fmt_date(date: chrono::NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(text: &str) -> CoreResult<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| CoreError::InvalidInput(format!("bad date '{}': {}", text, e)))
}

/// Default writer lock acquisition timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite-level busy timeout, milliseconds.
const BUSY_TIMEOUT_MS: i64 = 5_000;

fn apply_pragmas(conn: &Connection, file_backed: bool) -> CoreResult<()> {
    if file_backed {
        // journal_mode returns the resulting mode as a row.
        let _: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
    Ok(())
}

/// The database handle shared by workflows. Cloning is cheap; all clones
/// share the same writer lock.
#[derive(Clone)]
pub struct Database {
    path: Option<PathBuf>,
    writer: Arc<Mutex<Connection>>,
    lock_timeout: Duration,
}

impl Database {
    /// Open (creating if needed) a file-backed database and bring its
    /// schema up to date. A pre-migration backup is taken when anything
    /// is pending.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut conn = Connection::open(&path)?;
        apply_pragmas(&conn, true)?;
        let applied = migrations::run(&mut conn, Some(&path))?;
        if applied > 0 {
            info!(applied, db = %path.display(), "schema migrations applied");
        }
        Ok(Self {
            path: Some(path),
            writer: Arc::new(Mutex::new(conn)),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// In-memory database for tests; reads share the writer connection.
    pub fn in_memory() -> CoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        apply_pragmas(&conn, false)?;
        migrations::run(&mut conn, None)?;
        Ok(Self {
            path: None,
            writer: Arc::new(Mutex::new(conn)),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside a write transaction under the process-wide writer
    /// lock. Commits on `Ok`; any `Err` (or panic) rolls the whole
    /// transaction back. Lock acquisition is bounded: `WriterBusy` on
    /// timeout.
    pub fn write<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction) -> CoreResult<T>,
    {
        let mut guard = self
            .writer
            .try_lock_for(self.lock_timeout)
            .ok_or(CoreError::WriterBusy)?;
        let tx = guard.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls back.
                debug!(error = %e, "write transaction rolled back");
                Err(e)
            }
        }
    }

    /// Run `f` against a read connection. File-backed databases get a
    /// fresh read-only connection so readers never contend with the
    /// writer; in-memory databases fall back to the shared connection.
    pub fn read<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> CoreResult<T>,
    {
        match &self.path {
            Some(path) => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
                f(&conn)
            }
            None => {
                let guard = self.writer.lock();
                f(&guard)
            }
        }
    }

    /// Full integrity check: `PRAGMA integrity_check` plus the foreign
    /// key scan. Any finding surfaces as `IntegrityError`.
    pub fn integrity_check(&self) -> CoreResult<()> {
        let guard = self.writer.lock();
        let result: String =
            guard.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if result != "ok" {
            return Err(CoreError::IntegrityError(result));
        }
        let mut stmt = guard.prepare("PRAGMA foreign_key_check")?;
        let mut rows = stmt.query([])?;
        if rows.next()?.is_some() {
            return Err(CoreError::IntegrityError(
                "foreign key check reported violations".into(),
            ));
        }
        Ok(())
    }

    /// Current and pending schema versions, for the startup probe.
    pub fn schema_status(&self) -> CoreResult<migrations::SchemaStatus> {
        let guard = self.writer.lock();
        migrations::status(&guard)
    }
}

/// Exponential backoff on `DatabaseBusy` for idempotent operations only:
/// base 0.5 s, doubling, capped at 5 s, at most 3 attempts. Writes must
/// not be routed through this.
pub fn retry_idempotent<T, F>(mut op: F) -> CoreResult<T>
where
    F: FnMut() -> CoreResult<T>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut delay = Duration::from_millis(500);
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(attempt, delay_ms = delay.as_millis() as u64, "database busy; backing off");
                std::thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_secs(5));
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_in_memory_schema_applied() {
        let db = Database::in_memory().unwrap();
        let status = db.schema_status().unwrap();
        assert_eq!(status.current, status.latest);
        assert!(status.pending.is_empty());
    }

    #[test]
    fn test_write_commits_and_read_sees_it() {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            tx.execute(
                "INSERT INTO skus (sku, description) VALUES ('A', 'test')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let count: i64 = db
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM skus", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let db = Database::in_memory().unwrap();
        let result: CoreResult<()> = db.write(|tx| {
            tx.execute(
                "INSERT INTO skus (sku, description) VALUES ('A', 'test')",
                [],
            )?;
            Err(CoreError::InvalidInput("forced failure".into()))
        });
        assert!(result.is_err());
        let count: i64 = db
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM skus", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_backed_open_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");
        {
            let db = Database::open(&path).unwrap();
            db.write(|tx| {
                tx.execute(
                    "INSERT INTO skus (sku, description) VALUES ('A', 'persisted')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let desc: String = db
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT description FROM skus WHERE sku = 'A'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(desc, "persisted");
        db.integrity_check().unwrap();
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::in_memory().unwrap();
        let result: CoreResult<()> = db.write(|tx| {
            tx.execute(
                "INSERT INTO transactions (date, sku, event, qty)
                 VALUES ('2026-02-01', 'MISSING', 'SALE', 1)",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = retry_idempotent(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::DatabaseBusy)
        });
        assert!(matches!(result, Err(CoreError::DatabaseBusy)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_does_not_touch_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = retry_idempotent(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::InvalidInput("bad".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
