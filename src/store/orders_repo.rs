//! Order Log Repository

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::fmt_date;
use crate::error::{CoreError, CoreResult, Entity};
use crate::models::{OrderLog, OrderStatus};

fn row_to_order(row: &Row<'_>) -> rusqlite::Result<OrderLog> {
    let order_date: String = row.get("order_date")?;
    let receipt_date: String = row.get("receipt_date")?;
    let status: String = row.get("status")?;
    Ok(OrderLog {
        order_id: row.get("order_id")?,
        sku: row.get("sku")?,
        order_date: NaiveDate::parse_from_str(&order_date, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        receipt_date: NaiveDate::parse_from_str(&receipt_date, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        qty_ordered: row.get("qty_ordered")?,
        qty_received: row.get("qty_received")?,
        status: OrderStatus::parse_str(&status).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("bad status {}", status).into(),
            )
        })?,
        uplift_meta: row.get("uplift_meta")?,
    })
}

const ORDER_COLUMNS: &str =
    "order_id, sku, order_date, receipt_date, qty_ordered, qty_received, status, uplift_meta";

pub fn insert(conn: &Connection, order: &OrderLog) -> CoreResult<()> {
    if order.qty_ordered <= 0 {
        return Err(CoreError::InvalidInput(format!(
            "order {} quantity must be positive",
            order.order_id
        )));
    }
    let result = conn.execute(
        "INSERT INTO order_logs (order_id, sku, order_date, receipt_date, qty_ordered,
             qty_received, status, uplift_meta)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            order.order_id,
            order.sku,
            fmt_date(order.order_date),
            fmt_date(order.receipt_date),
            order.qty_ordered,
            order.qty_received,
            order.status.as_str(),
            order.uplift_meta.as_deref(),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, msg))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.as_deref().map(|m| m.contains("order_logs.order_id")).unwrap_or(false) =>
        {
            Err(CoreError::AlreadyExists(Entity::Order, order.order_id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get(conn: &Connection, order_id: &str) -> CoreResult<OrderLog> {
    conn.query_row(
        &format!("SELECT {} FROM order_logs WHERE order_id = ?1", ORDER_COLUMNS),
        [order_id],
        row_to_order,
    )
    .optional()?
    .ok_or_else(|| CoreError::NotFound(Entity::Order, order_id.to_string()))
}

/// Apply a received quantity. Status is re-derived from the quantities so
/// it can never drift out of step.
pub fn update_received(conn: &Connection, order_id: &str, qty_received: i64) -> CoreResult<OrderStatus> {
    let order = get(conn, order_id)?;
    let status = OrderStatus::derive(order.qty_ordered, qty_received)?;
    conn.execute(
        "UPDATE order_logs SET qty_received = ?1, status = ?2 WHERE order_id = ?3",
        params![qty_received, status.as_str(), order_id],
    )?;
    Ok(status)
}

/// Force a status (used when an order is declared closed short).
pub fn set_status(conn: &Connection, order_id: &str, status: OrderStatus) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE order_logs SET status = ?1 WHERE order_id = ?2",
        params![status.as_str(), order_id],
    )?;
    if changed == 0 {
        return Err(CoreError::NotFound(Entity::Order, order_id.to_string()));
    }
    Ok(())
}

/// Open (not fully received) orders for a SKU, FIFO by date then id.
pub fn list_open(conn: &Connection, sku: &str) -> CoreResult<Vec<OrderLog>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM order_logs
         WHERE sku = ?1 AND status != 'RECEIVED'
         ORDER BY order_date ASC, order_id ASC",
        ORDER_COLUMNS
    ))?;
    let rows = stmt.query_map([sku], row_to_order)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Next order-id sequence number for a day: max existing suffix plus one.
/// Must run under the writer lock so two confirmations cannot collide.
pub fn next_sequence_for_day(conn: &Connection, order_date: NaiveDate) -> CoreResult<u32> {
    let prefix = format!("{}_", order_date.format("%Y%m%d"));
    let mut stmt = conn.prepare_cached(
        "SELECT order_id FROM order_logs WHERE order_id LIKE ?1 || '%'",
    )?;
    let rows = stmt.query_map([&prefix], |row| row.get::<_, String>(0))?;
    let mut max_seq = 0u32;
    for row in rows {
        let id = row?;
        if let Some(suffix) = id.strip_prefix(&prefix) {
            if let Ok(n) = suffix.parse::<u32>() {
                max_seq = max_seq.max(n);
            }
        }
    }
    Ok(max_seq + 1)
}
