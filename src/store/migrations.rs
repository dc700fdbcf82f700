//! Schema Migrations
//!
//! Embedded `NNN_*.sql` files applied in order, each inside its own
//! transaction and recorded in `schema_version` with a SHA-256 checksum.
//! Already-applied versions are checksum-verified, a database newer than
//! the binary is refused, and file-backed databases get a pre-migration
//! backup before anything is touched.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

use super::backup;
use crate::error::{CoreError, CoreResult};

/// One embedded migration.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// All known migrations, ascending by version.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "001_initial.sql",
        sql: include_str!("../../migrations/001_initial.sql"),
    },
    Migration {
        version: 2,
        name: "002_kpi_audit.sql",
        sql: include_str!("../../migrations/002_kpi_audit.sql"),
    },
];

/// Startup probe result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current: u32,
    pub latest: u32,
    pub pending: Vec<u32>,
}

fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hex::encode(hasher.finalize())
}

fn ensure_version_table(conn: &Connection) -> CoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL,
            description TEXT NOT NULL,
            checksum    TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn current_version(conn: &Connection) -> CoreResult<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Current vs embedded schema versions. Errors if the database is newer
/// than this binary knows.
pub fn status(conn: &Connection) -> CoreResult<SchemaStatus> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let latest = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);
    if current > latest {
        return Err(CoreError::MigrationFailure(format!(
            "database schema v{} is newer than this binary (v{})",
            current, latest
        )));
    }
    let pending = MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .map(|m| m.version)
        .collect();
    Ok(SchemaStatus {
        current,
        latest,
        pending,
    })
}

/// Verify recorded checksums of already-applied migrations.
fn verify_applied(conn: &Connection) -> CoreResult<()> {
    for migration in MIGRATIONS {
        let stored: Option<String> = conn
            .query_row(
                "SELECT checksum FROM schema_version WHERE version = ?1",
                [migration.version],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(stored) = stored {
            let expected = checksum(migration.sql);
            if stored != expected {
                return Err(CoreError::MigrationFailure(format!(
                    "migration {} checksum mismatch: database has {}, binary has {}",
                    migration.name, stored, expected
                )));
            }
        }
    }
    Ok(())
}

/// Apply all pending migrations. Returns the number applied. Each runs in
/// its own transaction; the first failure rolls back and halts the
/// runner.
pub fn run(conn: &mut Connection, db_path: Option<&Path>) -> CoreResult<usize> {
    let schema = status(conn)?;
    verify_applied(conn)?;
    if schema.pending.is_empty() {
        return Ok(0);
    }

    // Pre-migration backup of the (main, wal, shm) triple.
    if let Some(path) = db_path {
        match backup::backup_triple(path, "premigration") {
            Ok(dest) => info!(backup = %dest.display(), "pre-migration backup written"),
            Err(e) => warn!(error = %e, "pre-migration backup failed; continuing"),
        }
    }

    let mut applied = 0;
    for migration in MIGRATIONS {
        if !schema.pending.contains(&migration.version) {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            CoreError::MigrationFailure(format!("{} failed: {}", migration.name, e))
        })?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at, description, checksum)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                migration.version,
                Utc::now().to_rfc3339(),
                migration.name,
                checksum(migration.sql),
            ],
        )?;
        tx.commit()?;
        info!(version = migration.version, name = migration.name, "migration applied");
        applied += 1;
    }
    Ok(applied)
}
