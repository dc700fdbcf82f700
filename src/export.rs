//! Snapshot Export
//!
//! Dumps every table to UTF-8 (BOM) CSV plus a `manifest.json` with the
//! schema version, per-table row counts, SHA-256 checksums and the export
//! timestamp. Import is not part of this core; the manifest lets external
//! tooling verify what it received.

use chrono::Utc;
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::CoreResult;
use crate::models::{EventType, Transaction};
use crate::store::{ledger_repo, migrations, Database};

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Tables included in a full export, in dump order.
const EXPORT_TABLES: &[&str] = &[
    "skus",
    "transactions",
    "sales",
    "order_logs",
    "receiving_logs",
    "order_receipts",
    "lots",
    "kpi_snapshots",
    "settings",
    "holidays",
    "audit_log",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableManifest {
    pub table: String,
    pub file: String,
    pub rows: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub exported_at: String,
    pub tables: Vec<TableManifest>,
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn value_to_field(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => hex::encode(b),
    }
}

/// Export every table to `dir`. Runs under a read connection; the write
/// lock is not held, so exports do not block operations.
pub fn export_snapshot(db: &Database, dir: &Path) -> CoreResult<ExportManifest> {
    fs::create_dir_all(dir)?;
    let schema_version = db.schema_status()?.current;

    let tables = db.read(|conn| {
        let mut tables = Vec::with_capacity(EXPORT_TABLES.len());
        for table in EXPORT_TABLES {
            let mut stmt = conn.prepare(&format!("SELECT * FROM {}", table))?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(|c| c.to_string()).collect();

            let mut body = Vec::from(UTF8_BOM);
            body.extend_from_slice(
                column_names
                    .iter()
                    .map(|c| csv_escape(c))
                    .collect::<Vec<_>>()
                    .join(",")
                    .as_bytes(),
            );
            body.extend_from_slice(b"\r\n");

            let mut rows = stmt.query([])?;
            let mut count = 0u64;
            while let Some(row) = rows.next()? {
                let fields: Vec<String> = (0..column_names.len())
                    .map(|i| {
                        row.get_ref(i)
                            .map(|v| csv_escape(&value_to_field(v)))
                            .unwrap_or_default()
                    })
                    .collect();
                body.extend_from_slice(fields.join(",").as_bytes());
                body.extend_from_slice(b"\r\n");
                count += 1;
            }

            let file = format!("{}.csv", table);
            fs::write(dir.join(&file), &body)?;

            let mut hasher = Sha256::new();
            hasher.update(&body);
            tables.push(TableManifest {
                table: table.to_string(),
                file,
                rows: count,
                sha256: hex::encode(hasher.finalize()),
            });
        }
        Ok(tables)
    })?;

    let manifest = ExportManifest {
        schema_version,
        exported_at: Utc::now().to_rfc3339(),
        tables,
    };
    fs::write(
        dir.join("manifest.json"),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    // The export itself is a ledger-visible action.
    db.write(|tx| {
        let today = Utc::now().date_naive();
        for sku_row in export_log_skus(tx)? {
            ledger_repo::append(
                tx,
                &Transaction::new(today, &sku_row, EventType::ExportLog, 0)
                    .with_note(&dir.display().to_string()),
            )?;
            // One marker is enough; the first assortment SKU carries it.
            break;
        }
        Ok(())
    })
    .ok();

    info!(dir = %dir.display(), tables = manifest.tables.len(), "snapshot exported");
    Ok(manifest)
}

fn export_log_skus(conn: &rusqlite::Connection) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT sku FROM skus ORDER BY sku ASC LIMIT 1")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Verify a previously written export directory against its manifest.
pub fn verify_export(dir: &Path) -> CoreResult<bool> {
    let manifest: ExportManifest =
        serde_json::from_str(&fs::read_to_string(dir.join("manifest.json"))?)?;
    for table in &manifest.tables {
        let path: PathBuf = dir.join(&table.file);
        let body = fs::read(&path)?;
        let mut hasher = Sha256::new();
        hasher.update(&body);
        if hex::encode(hasher.finalize()) != table.sha256 {
            return Ok(false);
        }
    }
    Ok(true)
}
