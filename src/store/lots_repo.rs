//! Lot Repository
//!
//! Persistence for the lot book. FEFO consumption is planned by the pure
//! engine and applied here inside the caller's transaction, surfacing the
//! outcome instead of hiding it.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

use super::fmt_date;
use crate::error::CoreResult;
use crate::fefo::{self, FefoOutcome};
use crate::models::Lot;

fn row_to_lot(row: &Row<'_>) -> rusqlite::Result<Lot> {
    let expiry: String = row.get("expiry_date")?;
    let receipt: Option<String> = row.get("receipt_date")?;
    Ok(Lot {
        lot_id: row.get("lot_id")?,
        sku: row.get("sku")?,
        expiry_date: NaiveDate::parse_from_str(&expiry, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        qty_on_hand: row.get("qty_on_hand")?,
        receipt_ref: row.get("receipt_ref")?,
        receipt_date: receipt
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
    })
}

/// Insert a lot, or add its quantity to an existing lot with the same
/// composite id (same document, sku and expiry).
pub fn upsert_add(conn: &Connection, lot: &Lot) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO lots (lot_id, sku, expiry_date, qty_on_hand, receipt_ref, receipt_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(lot_id) DO UPDATE SET
            qty_on_hand = qty_on_hand + excluded.qty_on_hand",
        params![
            lot.lot_id,
            lot.sku,
            fmt_date(lot.expiry_date),
            lot.qty_on_hand,
            lot.receipt_ref.as_deref(),
            lot.receipt_date.map(fmt_date),
        ],
    )?;
    Ok(())
}

/// All lots for a SKU in FEFO order (expiry, then lot id).
pub fn list_by_sku(conn: &Connection, sku: &str) -> CoreResult<Vec<Lot>> {
    let mut stmt = conn.prepare_cached(
        "SELECT lot_id, sku, expiry_date, qty_on_hand, receipt_ref, receipt_date
         FROM lots WHERE sku = ?1
         ORDER BY expiry_date ASC, lot_id ASC",
    )?;
    let rows = stmt.query_map([sku], row_to_lot)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn set_qty(conn: &Connection, lot_id: &str, qty_on_hand: i64) -> CoreResult<()> {
    conn.execute(
        "UPDATE lots SET qty_on_hand = ?1 WHERE lot_id = ?2",
        params![qty_on_hand.max(0), lot_id],
    )?;
    Ok(())
}

/// Consume `qty` units FEFO for a SKU: plan against the current lots,
/// persist the decrements, return the outcome. Depleted lots are left at
/// zero for `prune_empty`.
pub fn consume_fefo(conn: &Connection, sku: &str, qty: i64) -> CoreResult<FefoOutcome> {
    let lots = list_by_sku(conn, sku)?;
    let outcome = fefo::plan_consumption(&lots, qty);
    for consumption in &outcome.consumed {
        set_qty(conn, &consumption.lot_id, consumption.remaining)?;
    }
    Ok(outcome)
}

/// Delete zero-quantity lots for a SKU; returns the number pruned.
pub fn prune_empty(conn: &Connection, sku: &str) -> CoreResult<usize> {
    Ok(conn.execute(
        "DELETE FROM lots WHERE sku = ?1 AND qty_on_hand = 0",
        [sku],
    )?)
}

/// Total lot quantity for reconciliation against the ledger.
pub fn total_on_hand(conn: &Connection, sku: &str) -> CoreResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(qty_on_hand), 0) FROM lots WHERE sku = ?1",
        [sku],
        |row| row.get(0),
    )?)
}
