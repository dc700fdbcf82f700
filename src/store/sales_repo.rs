//! Sales Aggregate Repository
//!
//! One row per SKU per day, the training source for forecasting and the
//! input to end-of-day closure.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::fmt_date;
use crate::error::{CoreError, CoreResult};
use crate::models::SaleRecord;

pub fn upsert(
    conn: &Connection,
    date: NaiveDate,
    sku: &str,
    qty_sold: i64,
    promo: bool,
) -> CoreResult<()> {
    if qty_sold < 0 {
        return Err(CoreError::InvalidInput(format!(
            "qty_sold {} must be non-negative",
            qty_sold
        )));
    }
    conn.execute(
        "INSERT INTO sales (date, sku, qty_sold, promo) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(date, sku) DO UPDATE SET
            qty_sold = excluded.qty_sold,
            promo = excluded.promo",
        params![fmt_date(date), sku, qty_sold, promo as i64],
    )?;
    Ok(())
}

/// Sales for a SKU in `[from, to]`, ascending by date. Days without a row
/// are absent; the caller densifies when it needs a full series.
pub fn list(
    conn: &Connection,
    sku: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> CoreResult<Vec<SaleRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT date, qty_sold, promo FROM sales
         WHERE sku = ?1 AND date >= ?2 AND date <= ?3
         ORDER BY date ASC",
    )?;
    let rows = stmt.query_map(params![sku, fmt_date(from), fmt_date(to)], |row| {
        let date: String = row.get(0)?;
        let qty: i64 = row.get(1)?;
        let promo: i64 = row.get(2)?;
        Ok((date, qty, promo))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (date, qty_sold, promo) = row?;
        out.push(SaleRecord {
            date: super::parse_date(&date)?,
            qty_sold,
            promo: promo != 0,
        });
    }
    Ok(out)
}

pub fn get(conn: &Connection, sku: &str, date: NaiveDate) -> CoreResult<Option<SaleRecord>> {
    let found = conn
        .query_row(
            "SELECT qty_sold, promo FROM sales WHERE sku = ?1 AND date = ?2",
            params![sku, fmt_date(date)],
            |row| {
                let qty: i64 = row.get(0)?;
                let promo: i64 = row.get(1)?;
                Ok((qty, promo))
            },
        )
        .optional()?;
    Ok(found.map(|(qty_sold, promo)| SaleRecord {
        date,
        qty_sold,
        promo: promo != 0,
    }))
}
