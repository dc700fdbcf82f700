//! End-of-Day Closure
//!
//! Folds the day's sales aggregate into the ledger, applies FEFO on the
//! lot book for perishables, and records ADJUST events for supplied
//! physical counts. One transaction per day-closure invocation.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::info;

use crate::error::CoreResult;
use crate::fefo::FefoOutcome;
use crate::models::{EventType, Transaction};
use crate::store::{audit_repo, ledger_repo, lots_repo, sales_repo, sku_repo, Database};

/// Per-SKU result of a day closure.
#[derive(Debug, Clone)]
pub struct EodLine {
    pub sku: String,
    pub qty_sold: i64,
    pub sale_event_written: bool,
    /// Present for perishables: the FEFO application, surfaced instead of
    /// happening silently.
    pub fefo_applied: Option<FefoOutcome>,
    pub adjusted_to: Option<i64>,
}

/// Close `date` for every SKU with a sales row that day. `counts` maps
/// SKU to a physical count; each becomes an ADJUST event after the sales
/// fold.
pub fn close_day(
    db: &Database,
    date: NaiveDate,
    counts: &BTreeMap<String, i64>,
    actor: &str,
) -> CoreResult<Vec<EodLine>> {
    db.write(|tx| {
        let mut lines = Vec::new();

        // Every SKU with sales that day.
        let mut stmt = tx.prepare("SELECT sku FROM sales WHERE date = ?1 ORDER BY sku ASC")?;
        let skus: Vec<String> = stmt
            .query_map([crate::store::fmt_date(date)], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        for sku_id in &skus {
            let sku = sku_repo::get(tx, sku_id)?;
            let sale = sales_repo::get(tx, sku_id, date)?
                .map(|s| s.qty_sold)
                .unwrap_or(0);

            // Item-level writes may already have recorded the day's SALE
            // events; the aggregate fold only fills the gap.
            let already: i64 = tx.query_row(
                "SELECT COALESCE(SUM(qty), 0) FROM transactions
                 WHERE sku = ?1 AND date = ?2 AND event = 'SALE'",
                rusqlite::params![sku_id, crate::store::fmt_date(date)],
                |row| row.get(0),
            )?;
            let missing = (sale - already).max(0);
            let mut sale_event_written = false;
            if missing > 0 {
                ledger_repo::append(
                    tx,
                    &Transaction::new(date, sku_id, EventType::Sale, missing)
                        .with_note("eod sales fold"),
                )?;
                sale_event_written = true;
            }

            // FEFO against the day's aggregate, not the ledger events.
            // Only the freshly folded portion consumes lots, so closing a
            // day twice cannot drain the lot book twice.
            let fefo_applied = if sku.is_perishable() && missing > 0 {
                Some(lots_repo::consume_fefo(tx, sku_id, missing)?)
            } else {
                None
            };

            let adjusted_to = counts.get(sku_id).copied();
            if let Some(count) = adjusted_to {
                ledger_repo::append(
                    tx,
                    &Transaction::new(date, sku_id, EventType::Adjust, count)
                        .with_note("eod count"),
                )?;
            }

            lines.push(EodLine {
                sku: sku_id.clone(),
                qty_sold: sale,
                sale_event_written,
                fefo_applied,
                adjusted_to,
            });
        }

        // Counts for SKUs without sales still adjust.
        for (sku_id, count) in counts {
            if skus.contains(sku_id) {
                continue;
            }
            sku_repo::get(tx, sku_id)?;
            ledger_repo::append(
                tx,
                &Transaction::new(date, sku_id, EventType::Adjust, *count)
                    .with_note("eod count"),
            )?;
            lines.push(EodLine {
                sku: sku_id.clone(),
                qty_sold: 0,
                sale_event_written: false,
                fefo_applied: None,
                adjusted_to: Some(*count),
            });
        }

        audit_repo::append(
            tx,
            actor,
            "eod_close",
            None,
            Some(&format!("date={} skus={}", date, lines.len())),
        )?;
        info!(%date, skus = lines.len(), "end of day closed");
        Ok(lines)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::stock_asof;
    use crate::models::Sku;
    use crate::store::{lots_repo, sales_repo, sku_repo};
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn setup() -> Database {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            let mut perishable = Sku::new("D", "Yogurt 500g");
            perishable.shelf_life_days = 30;
            sku_repo::upsert(tx, &perishable)?;
            sku_repo::upsert(tx, &Sku::new("A", "Canned beans"))?;
            ledger_repo::append(
                tx,
                &Transaction::new(d(2026, 2, 1), "D", EventType::Snapshot, 50),
            )?;
            ledger_repo::append(
                tx,
                &Transaction::new(d(2026, 2, 1), "A", EventType::Snapshot, 40),
            )?;
            lots_repo::upsert_add(
                tx,
                &crate::models::Lot {
                    lot_id: "l1".to_string(),
                    sku: "D".to_string(),
                    expiry_date: d(2026, 2, 10),
                    qty_on_hand: 20,
                    receipt_ref: None,
                    receipt_date: None,
                },
            )?;
            lots_repo::upsert_add(
                tx,
                &crate::models::Lot {
                    lot_id: "l2".to_string(),
                    sku: "D".to_string(),
                    expiry_date: d(2026, 2, 20),
                    qty_on_hand: 30,
                    receipt_ref: None,
                    receipt_date: None,
                },
            )?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_sales_fold_and_fefo() {
        let db = setup();
        let date = d(2026, 2, 5);
        db.write(|tx| {
            sales_repo::upsert(tx, date, "D", 25, false)?;
            sales_repo::upsert(tx, date, "A", 8, false)?;
            Ok(())
        })
        .unwrap();

        let lines = close_day(&db, date, &BTreeMap::new(), "tester").unwrap();
        assert_eq!(lines.len(), 2);

        let d_line = lines.iter().find(|l| l.sku == "D").unwrap();
        assert!(d_line.sale_event_written);
        let fefo = d_line.fefo_applied.as_ref().unwrap();
        assert_eq!(fefo.satisfied, 25);
        // Earliest-expiry lot drained first.
        assert_eq!(fefo.consumed[0].lot_id, "l1");
        assert_eq!(fefo.consumed[0].remaining, 0);

        db.read(|conn| {
            let txs = ledger_repo::list_until(conn, "D", date)?;
            assert_eq!(stock_asof("D", date, &txs).on_hand, 25);
            assert_eq!(lots_repo::total_on_hand(conn, "D")?, 25);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_item_level_sales_not_double_folded() {
        let db = setup();
        let date = d(2026, 2, 5);
        db.write(|tx| {
            sales_repo::upsert(tx, date, "A", 8, false)?;
            // POS integration already wrote 8 as item-level events.
            ledger_repo::append(tx, &Transaction::new(date, "A", EventType::Sale, 8))?;
            Ok(())
        })
        .unwrap();
        let lines = close_day(&db, date, &BTreeMap::new(), "tester").unwrap();
        let a_line = lines.iter().find(|l| l.sku == "A").unwrap();
        assert!(!a_line.sale_event_written);
        db.read(|conn| {
            let txs = ledger_repo::list_until(conn, "A", date)?;
            assert_eq!(stock_asof("A", date, &txs).on_hand, 32);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_physical_count_adjusts() {
        let db = setup();
        let date = d(2026, 2, 5);
        db.write(|tx| {
            sales_repo::upsert(tx, date, "A", 8, false)?;
            Ok(())
        })
        .unwrap();
        let mut counts = BTreeMap::new();
        counts.insert("A".to_string(), 30);
        close_day(&db, date, &counts, "tester").unwrap();
        db.read(|conn| {
            let txs = ledger_repo::list_until(conn, "A", date)?;
            // ADJUST applies after SALE within the day: absolute 30.
            assert_eq!(stock_asof("A", date, &txs).on_hand, 30);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_count_without_sales_row() {
        let db = setup();
        let date = d(2026, 2, 5);
        let mut counts = BTreeMap::new();
        counts.insert("D".to_string(), 48);
        let lines = close_day(&db, date, &counts, "tester").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].adjusted_to, Some(48));
    }
}
