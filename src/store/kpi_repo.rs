//! KPI Snapshot Repository

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use super::{fmt_date, parse_date};
use crate::error::CoreResult;
use crate::models::KpiSnapshot;

pub fn upsert(conn: &Connection, snapshot: &KpiSnapshot) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO kpi_snapshots (sku, date, mode, oos_rate, fill_rate, wmape, bias,
             lost_sales_estimate, lookback_days)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(sku, date, mode) DO UPDATE SET
            oos_rate = excluded.oos_rate,
            fill_rate = excluded.fill_rate,
            wmape = excluded.wmape,
            bias = excluded.bias,
            lost_sales_estimate = excluded.lost_sales_estimate,
            lookback_days = excluded.lookback_days",
        params![
            snapshot.sku,
            fmt_date(snapshot.date),
            snapshot.mode,
            snapshot.oos_rate,
            snapshot.fill_rate,
            snapshot.wmape,
            snapshot.bias,
            snapshot.lost_sales_estimate,
            snapshot.lookback_days,
        ],
    )?;
    Ok(())
}

pub fn list_for_sku(conn: &Connection, sku: &str) -> CoreResult<Vec<KpiSnapshot>> {
    let mut stmt = conn.prepare_cached(
        "SELECT sku, date, mode, oos_rate, fill_rate, wmape, bias, lost_sales_estimate,
                lookback_days
         FROM kpi_snapshots WHERE sku = ?1 ORDER BY date ASC, mode ASC",
    )?;
    let rows = stmt.query_map([sku], |row| {
        let date: String = row.get(1)?;
        Ok((
            row.get::<_, String>(0)?,
            date,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, f64>(4)?,
            row.get::<_, Option<f64>>(5)?,
            row.get::<_, Option<f64>>(6)?,
            row.get::<_, f64>(7)?,
            row.get::<_, i64>(8)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (sku, date, mode, oos_rate, fill_rate, wmape, bias, lost, lookback) = row?;
        out.push(KpiSnapshot {
            sku,
            date: parse_date(&date)?,
            mode,
            oos_rate,
            fill_rate,
            wmape,
            bias,
            lost_sales_estimate: lost,
            lookback_days: lookback,
        });
    }
    Ok(out)
}
