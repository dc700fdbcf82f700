//! Backups and Restore
//!
//! A backup is the `(main, -wal, -shm)` triple copied at a consistent
//! instant plus a small manifest. Restores are vetted: integrity-check
//! the backup before copying and the database after.

use chrono::Utc;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::Database;
use crate::error::{CoreError, CoreResult};

const BACKUP_PREFIX: &str = "stockpilot_";

/// Written next to each backup triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub created_at: String,
    pub reason: String,
    pub source: String,
    pub files: Vec<String>,
}

fn sidecar_paths(main: &Path) -> (PathBuf, PathBuf) {
    let wal = PathBuf::from(format!("{}-wal", main.display()));
    let shm = PathBuf::from(format!("{}-shm", main.display()));
    (wal, shm)
}

fn manifest_path(backup_main: &Path) -> PathBuf {
    backup_main.with_extension("manifest.json")
}

/// Directory where backups of `db_path` live.
pub fn backup_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("backups")
}

/// Copy the database triple into the backup directory. The caller must
/// guarantee no concurrent writer (hold the writer lock, or run before
/// the handle is shared).
pub fn backup_triple(db_path: &Path, reason: &str) -> CoreResult<PathBuf> {
    let dir = backup_dir(db_path);
    fs::create_dir_all(&dir)?;

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let dest_main = dir.join(format!("{}{}_{}.db", BACKUP_PREFIX, stamp, reason));

    let mut files = Vec::new();
    fs::copy(db_path, &dest_main)?;
    files.push(dest_main.file_name().unwrap().to_string_lossy().into_owned());

    let (src_wal, src_shm) = sidecar_paths(db_path);
    let (dest_wal, dest_shm) = sidecar_paths(&dest_main);
    if src_wal.exists() {
        fs::copy(&src_wal, &dest_wal)?;
        files.push(dest_wal.file_name().unwrap().to_string_lossy().into_owned());
    }
    if src_shm.exists() {
        fs::copy(&src_shm, &dest_shm)?;
        files.push(dest_shm.file_name().unwrap().to_string_lossy().into_owned());
    }

    let manifest = BackupManifest {
        created_at: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        source: db_path.display().to_string(),
        files,
    };
    fs::write(
        manifest_path(&dest_main),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    Ok(dest_main)
}

/// Back up a live database under the writer lock, checkpointing the WAL
/// first so the main file is current.
pub fn backup_database(db: &Database, reason: &str) -> CoreResult<PathBuf> {
    let path = db
        .path()
        .ok_or_else(|| CoreError::InvalidInput("in-memory databases cannot be backed up".into()))?
        .to_path_buf();
    // Hold the writer lock for the whole copy; checkpoint first so the
    // main file is current.
    let guard = db.writer.lock();
    guard
        .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
        .ok();
    let dest = backup_triple(&path, reason)?;
    drop(guard);
    info!(backup = %dest.display(), reason, "backup written");
    Ok(dest)
}

/// Keep the newest `keep` backups for `reason`; delete older triples and
/// their manifests. Returns the number of backups removed.
pub fn prune_backups(dir: &Path, reason: &str, keep: usize) -> CoreResult<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let suffix = format!("_{}.db", reason);
    let mut mains: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(&suffix))
                .unwrap_or(false)
        })
        .collect();
    // Timestamps embed in names, so lexical order is chronological.
    mains.sort();
    let mut removed = 0;
    while mains.len() > keep {
        let victim = mains.remove(0);
        let (wal, shm) = sidecar_paths(&victim);
        for file in [manifest_path(&victim), wal, shm, victim] {
            if file.exists() {
                if let Err(e) = fs::remove_file(&file) {
                    warn!(file = %file.display(), error = %e, "backup prune failed");
                }
            }
        }
        removed += 1;
    }
    Ok(removed)
}

/// Integrity-check a database file without touching it.
pub fn integrity_check_file(path: &Path) -> CoreResult<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if result != "ok" {
        return Err(CoreError::IntegrityError(format!(
            "{}: {}",
            path.display(),
            result
        )));
    }
    Ok(())
}

/// Vetted restore: integrity-check the backup, replace the live triple,
/// integrity-check the result. The database must not be open elsewhere.
pub fn restore_backup(backup_main: &Path, db_path: &Path) -> CoreResult<()> {
    integrity_check_file(backup_main)?;

    let (live_wal, live_shm) = sidecar_paths(db_path);
    let (bak_wal, bak_shm) = sidecar_paths(backup_main);

    fs::copy(backup_main, db_path)?;
    // Stale sidecars from the previous life of the database must go.
    for (bak, live) in [(bak_wal, live_wal), (bak_shm, live_shm)] {
        if bak.exists() {
            fs::copy(&bak, &live)?;
        } else if live.exists() {
            fs::remove_file(&live)?;
        }
    }

    integrity_check_file(db_path)?;
    info!(from = %backup_main.display(), to = %db_path.display(), "restore complete");
    Ok(())
}
