//! Ledger Repository
//!
//! Append-only access to the transaction log. Rows are never updated;
//! deletion exists only for the exception-revert workflow, which targets
//! the surrogate id.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

use super::{fmt_date, parse_date};
use crate::error::{CoreError, CoreResult};
use crate::models::{EventType, Transaction};

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let date_text: String = row.get("date")?;
    let event_text: String = row.get("event")?;
    let receipt_text: Option<String> = row.get("receipt_date")?;
    Ok(Transaction {
        id: Some(row.get("transaction_id")?),
        date: NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        sku: row.get("sku")?,
        event: EventType::parse_str(&event_text).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("bad event {}", event_text).into(),
            )
        })?,
        qty: row.get("qty")?,
        receipt_date: receipt_text
            .map(|t| {
                NaiveDate::parse_from_str(&t, "%Y-%m-%d").map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
            })
            .transpose()?,
        note: row.get("note")?,
    })
}

/// Append one event; negative quantities are rejected for stock events.
pub fn append(conn: &Connection, tx: &Transaction) -> CoreResult<i64> {
    if tx.qty < 0 && !tx.event.is_audit() {
        return Err(CoreError::InvalidInput(format!(
            "negative quantity {} for {}",
            tx.qty,
            tx.event.as_str()
        )));
    }
    conn.execute(
        "INSERT INTO transactions (date, sku, event, qty, receipt_date, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            fmt_date(tx.date),
            tx.sku,
            tx.event.as_str(),
            tx.qty,
            tx.receipt_date.map(fmt_date),
            tx.note.as_deref(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn append_batch(conn: &Connection, txs: &[Transaction]) -> CoreResult<Vec<i64>> {
    let mut ids = Vec::with_capacity(txs.len());
    for tx in txs {
        ids.push(append(conn, tx)?);
    }
    Ok(ids)
}

/// List a SKU's events, optionally bounded by date and filtered by kind,
/// in (date, id) order.
pub fn list(
    conn: &Connection,
    sku: &str,
    date_range: Option<(NaiveDate, NaiveDate)>,
    events: Option<&[EventType]>,
) -> CoreResult<Vec<Transaction>> {
    let mut sql = String::from(
        "SELECT transaction_id, date, sku, event, qty, receipt_date, note
         FROM transactions WHERE sku = ?1",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(sku.to_string())];
    if let Some((from, to)) = date_range {
        sql.push_str(" AND date >= ? AND date <= ?");
        params_vec.push(Box::new(fmt_date(from)));
        params_vec.push(Box::new(fmt_date(to)));
    }
    if let Some(kinds) = events {
        if !kinds.is_empty() {
            let placeholders = vec!["?"; kinds.len()].join(", ");
            sql.push_str(&format!(" AND event IN ({})", placeholders));
            for kind in kinds {
                params_vec.push(Box::new(kind.as_str().to_string()));
            }
        }
    }
    sql.push_str(" ORDER BY date ASC, transaction_id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(refs.as_slice(), row_to_transaction)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// All events for a SKU up to and including `asof`.
pub fn list_until(conn: &Connection, sku: &str, asof: NaiveDate) -> CoreResult<Vec<Transaction>> {
    let mut stmt = conn.prepare_cached(
        "SELECT transaction_id, date, sku, event, qty, receipt_date, note
         FROM transactions WHERE sku = ?1 AND date <= ?2
         ORDER BY date ASC, transaction_id ASC",
    )?;
    let rows = stmt.query_map(params![sku, fmt_date(asof)], row_to_transaction)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Dates of UNFULFILLED events in a window, for censoring.
pub fn unfulfilled_dates(
    conn: &Connection,
    sku: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> CoreResult<Vec<NaiveDate>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT date FROM transactions
         WHERE sku = ?1 AND event = 'UNFULFILLED' AND date >= ?2 AND date <= ?3
         ORDER BY date ASC",
    )?;
    let rows = stmt.query_map(params![sku, fmt_date(from), fmt_date(to)], |row| {
        row.get::<_, String>(0)
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(parse_date(&row?)?);
    }
    Ok(out)
}

/// Delete one row by surrogate id. Only the exception-revert workflow
/// calls this.
pub fn delete_by_id(conn: &Connection, id: i64) -> CoreResult<bool> {
    Ok(conn.execute("DELETE FROM transactions WHERE transaction_id = ?1", [id])? > 0)
}

/// Find ids matching (sku, date, event) for field-based revert.
pub fn find_ids(
    conn: &Connection,
    sku: &str,
    date: NaiveDate,
    event: EventType,
) -> CoreResult<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT transaction_id FROM transactions
         WHERE sku = ?1 AND date = ?2 AND event = ?3
         ORDER BY transaction_id ASC",
    )?;
    let rows = stmt.query_map(params![sku, fmt_date(date), event.as_str()], |row| {
        row.get(0)
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
