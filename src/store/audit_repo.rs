//! Audit Log Repository
//!
//! Append-only operator trail, written inside the same transaction as the
//! mutation it records.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::CoreResult;

pub fn append(
    conn: &Connection,
    actor: &str,
    action: &str,
    sku: Option<&str>,
    details: Option<&str>,
) -> CoreResult<i64> {
    conn.execute(
        "INSERT INTO audit_log (ts, actor, action, sku, details)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![Utc::now().to_rfc3339(), actor, action, sku, details],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent entries, newest first.
pub fn recent(conn: &Connection, limit: usize) -> CoreResult<Vec<(String, String, Option<String>)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT ts, action, sku FROM audit_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sku;
    use crate::store::{sku_repo, Database};

    #[test]
    fn test_append_and_recent() {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            sku_repo::upsert(tx, &Sku::new("A", "Item"))?;
            append(tx, "operator", "confirm_orders", Some("A"), Some("qty=12"))?;
            append(tx, "operator", "close_receipt", None, None)?;
            Ok(())
        })
        .unwrap();
        let rows = db.read(|conn| recent(conn, 10)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, "close_receipt");
    }

    #[test]
    fn test_sku_reference_survives_delete() {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            sku_repo::upsert(tx, &Sku::new("GONE", "Ephemeral"))?;
            append(tx, "operator", "sku_edit", Some("GONE"), None)?;
            Ok(())
        })
        .unwrap();
        // Deleting the SKU nulls the audit reference instead of failing.
        db.write(|tx| sku_repo::delete(tx, "GONE")).unwrap();
        let rows = db.read(|conn| recent(conn, 10)).unwrap();
        assert_eq!(rows[0].2, None);
    }
}
