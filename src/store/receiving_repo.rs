//! Receiving Log Repository
//!
//! Document rows and the order/document junction. The `document_id`
//! primary key is the idempotency gate the receipt-closure workflow
//! checks before writing anything.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::{fmt_date, parse_date};
use crate::error::{CoreError, CoreResult, Entity};
use crate::models::ReceivingLog;

pub fn exists(conn: &Connection, document_id: &str) -> CoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM receiving_logs WHERE document_id = ?1",
            [document_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn insert(conn: &Connection, log: &ReceivingLog) -> CoreResult<()> {
    if log.qty_received <= 0 {
        return Err(CoreError::InvalidInput(format!(
            "document {} quantity must be positive",
            log.document_id
        )));
    }
    let result = conn.execute(
        "INSERT INTO receiving_logs (document_id, date, sku, qty_received, receipt_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            log.document_id,
            fmt_date(log.date),
            log.sku,
            log.qty_received,
            fmt_date(log.receipt_date),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, msg))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg
                    .as_deref()
                    .map(|m| m.contains("receiving_logs.document_id"))
                    .unwrap_or(false) =>
        {
            Err(CoreError::AlreadyExists(Entity::Document, log.document_id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get(conn: &Connection, document_id: &str) -> CoreResult<ReceivingLog> {
    conn.query_row(
        "SELECT document_id, date, sku, qty_received, receipt_date
         FROM receiving_logs WHERE document_id = ?1",
        [document_id],
        |row| {
            let date: String = row.get(1)?;
            let receipt: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                date,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                receipt,
            ))
        },
    )
    .optional()?
    .map(|(document_id, date, sku, qty_received, receipt_date)| {
        Ok::<ReceivingLog, CoreError>(ReceivingLog {
            document_id,
            date: parse_date(&date)?,
            sku,
            qty_received,
            receipt_date: parse_date(&receipt_date)?,
        })
    })
    .transpose()?
    .ok_or_else(|| CoreError::NotFound(Entity::Document, document_id.to_string()))
}

/// Link an order to the document that (partially) closed it.
pub fn link_order(conn: &Connection, order_id: &str, document_id: &str) -> CoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO order_receipts (order_id, document_id) VALUES (?1, ?2)",
        params![order_id, document_id],
    )?;
    Ok(())
}

/// Order ids touched by a document, the junction read model.
pub fn orders_for_document(conn: &Connection, document_id: &str) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT order_id FROM order_receipts WHERE document_id = ?1 ORDER BY order_id ASC",
    )?;
    let rows = stmt.query_map([document_id], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Documents that touched an order.
pub fn documents_for_order(conn: &Connection, order_id: &str) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT document_id FROM order_receipts WHERE order_id = ?1 ORDER BY document_id ASC",
    )?;
    let rows = stmt.query_map([order_id], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
