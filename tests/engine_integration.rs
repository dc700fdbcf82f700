//! End-to-end scenarios against a file-backed database.
//!
//! Each test drives the public workflow surface the way the application
//! would: seed master data and history, run proposals/receipts/closures,
//! then assert on reconstructed stock and document state.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

use stockpilot::calendar::Lane;
use stockpilot::ledger::stock_asof;
use stockpilot::models::{EventType, OrderLog, OrderStatus, Sku, Transaction, WastePenaltyMode};
use stockpilot::store::{
    ledger_repo, lots_repo, orders_repo, sales_repo, sku_repo, Database,
};
use stockpilot::workflow::{self, ReceiptItem, ReceiptOutcome};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn open_db(dir: &TempDir) -> Database {
    Database::open(dir.path().join("test.db")).expect("open database")
}

/// Scenario: SNAPSHOT + ORDER + partial RECEIPT + SALE reconstructs the
/// expected stock at a later AsOf date.
#[test]
fn asof_after_snapshot_order_partial_receipt() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.write(|tx| {
        sku_repo::upsert(tx, &Sku::new("A", "Scenario A"))?;
        ledger_repo::append(
            tx,
            &Transaction::new(d(2026, 2, 1), "A", EventType::Snapshot, 100),
        )?;
        ledger_repo::append(
            tx,
            &Transaction::new(d(2026, 2, 3), "A", EventType::Order, 50)
                .with_receipt_date(d(2026, 2, 10)),
        )?;
        ledger_repo::append(
            tx,
            &Transaction::new(d(2026, 2, 10), "A", EventType::Receipt, 30),
        )?;
        ledger_repo::append(
            tx,
            &Transaction::new(d(2026, 2, 12), "A", EventType::Sale, 40),
        )?;
        Ok(())
    })
    .unwrap();

    let stock = db
        .read(|conn| {
            let txs = ledger_repo::list_until(conn, "A", d(2026, 2, 13))?;
            Ok(stock_asof("A", d(2026, 2, 13), &txs))
        })
        .unwrap();
    assert_eq!(stock.on_hand, 90);
    assert_eq!(stock.on_order, 20);
    assert_eq!(stock.unfulfilled, 0);
}

/// Scenario: a 40-unit document closes O1 (20) fully and O2 (30)
/// partially; the second close of the same document changes nothing.
#[test]
fn idempotent_receipt_closure_with_lot() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.write(|tx| {
        let mut sku = Sku::new("B", "Scenario B");
        sku.shelf_life_days = 90;
        sku_repo::upsert(tx, &sku)?;
        for (id, qty) in [("O1", 20), ("O2", 30)] {
            orders_repo::insert(
                tx,
                &OrderLog {
                    order_id: id.to_string(),
                    sku: "B".to_string(),
                    order_date: d(2026, 2, 3),
                    receipt_date: d(2026, 2, 9),
                    qty_ordered: qty,
                    qty_received: 0,
                    status: OrderStatus::Pending,
                    uplift_meta: None,
                },
            )?;
        }
        Ok(())
    })
    .unwrap();

    let items = vec![ReceiptItem {
        sku: "B".to_string(),
        qty_received: 40,
        target_order_ids: vec!["O1".to_string(), "O2".to_string()],
    }];
    let outcome =
        workflow::close_receipt(&db, "DDT-1", d(2026, 2, 9), &items, false, "test").unwrap();
    let summary = match outcome {
        ReceiptOutcome::Inserted(s) => s,
        ReceiptOutcome::AlreadyProcessed => panic!("first close must insert"),
    };
    assert_eq!(summary.allocations.len(), 2);
    assert_eq!(summary.lots_created.len(), 1);

    db.read(|conn| {
        let o1 = orders_repo::get(conn, "O1")?;
        assert_eq!((o1.qty_received, o1.status), (20, OrderStatus::Received));
        let o2 = orders_repo::get(conn, "O2")?;
        assert_eq!((o2.qty_received, o2.status), (20, OrderStatus::Partial));

        // Conservation: RECEIPT events total the document quantity, and
        // so do the order increments.
        let receipt_total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(qty), 0) FROM transactions
             WHERE sku = 'B' AND event = 'RECEIPT'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(receipt_total, 40);
        assert_eq!(o1.qty_received + o2.qty_received, 40);

        // One receiving log, one lot carrying the document quantity.
        let logs: i64 =
            conn.query_row("SELECT COUNT(*) FROM receiving_logs", [], |r| r.get(0))?;
        assert_eq!(logs, 1);
        assert_eq!(lots_repo::total_on_hand(conn, "B")?, 40);
        Ok(())
    })
    .unwrap();

    // Second close: no side effects at all.
    let tx_count = |db: &Database| -> i64 {
        db.read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?)
        })
        .unwrap()
    };
    let before = tx_count(&db);
    let again =
        workflow::close_receipt(&db, "DDT-1", d(2026, 2, 9), &items, false, "test").unwrap();
    assert!(again.already_processed());
    assert_eq!(tx_count(&db), before);
}

/// Seed eight weeks of steady 10/day sales plus enough receipts to keep
/// stock positive, ending the day before the Friday order date.
fn seed_steady_sku(db: &Database, sku_id: &str, on_hand_target: i64) {
    db.write(|tx| {
        sku_repo::upsert(tx, &Sku::new(sku_id, "Steady mover"))?;
        let sales_start = d(2025, 12, 12);
        let sales_end = d(2026, 2, 5);
        let days = (sales_end - sales_start).num_days() + 1;
        let total_sold = 10 * days;
        ledger_repo::append(
            tx,
            &Transaction::new(
                d(2025, 12, 11),
                sku_id,
                EventType::Snapshot,
                on_hand_target + total_sold,
            ),
        )?;
        let mut date = sales_start;
        while date <= sales_end {
            sales_repo::upsert(tx, date, sku_id, 10, false)?;
            ledger_repo::append(tx, &Transaction::new(date, sku_id, EventType::Sale, 10))?;
            date += Duration::days(1);
        }
        Ok(())
    })
    .unwrap();
}

/// Scenario: Friday dual lane. The Saturday proposal covers three days of
/// demand; once it joins the pipeline, the Monday proposal needs nothing.
#[test]
fn friday_dual_lane_no_double_count() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    seed_steady_sku(&db, "C", 20);

    let friday = d(2026, 2, 6);
    let (saturday, monday) = workflow::friday_proposals_for_sku(&db, "C", friday).unwrap();

    assert_eq!(saturday.receipt_date, d(2026, 2, 7));
    assert_eq!(saturday.breakdown.protection_days, 3);
    assert_eq!(monday.receipt_date, d(2026, 2, 9));
    assert_eq!(monday.breakdown.protection_days, 1);

    // ~30 demand over the Saturday window against 20 on hand.
    assert!(saturday.qty >= 5, "saturday qty = {}", saturday.qty);

    // Monday alone (no Saturday order) for comparison.
    let monday_alone = workflow::proposal_for_sku(&db, "C", friday, Lane::Monday).unwrap();
    assert!(
        monday.qty <= monday_alone.qty,
        "dual-lane monday {} must not exceed standalone {}",
        monday.qty,
        monday_alone.qty
    );
    // With the Saturday order in the pipeline the Monday need vanishes.
    assert_eq!(monday.qty, 0);
}

/// Proposals are a pure function of the stored snapshot: two runs agree.
#[test]
fn proposal_generation_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    seed_steady_sku(&db, "C", 5);

    let first = workflow::proposal_for_sku(&db, "C", d(2026, 2, 6), Lane::Standard).unwrap();
    let second = workflow::proposal_for_sku(&db, "C", d(2026, 2, 6), Lane::Standard).unwrap();
    assert_eq!(first.qty, second.qty);
    assert_eq!(first.breakdown, second.breakdown);
}

/// Scenario: shelf-life soft penalty fires on a perishable with heavy
/// expiring-soon stock and the reduced quantity flows into constraints.
#[test]
fn shelf_life_penalty_reduces_order() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.write(|tx| {
        let mut sku = Sku::new("D", "Perishable D");
        sku.shelf_life_days = 60;
        sku.min_shelf_life_days = 14;
        sku.waste_penalty_mode = WastePenaltyMode::Soft;
        sku.waste_penalty_factor = 0.3;
        sku.waste_risk_threshold = 15.0;
        sku_repo::upsert(tx, &sku)?;

        // Sales at 2/day keep the SKU moving but slow.
        ledger_repo::append(
            tx,
            &Transaction::new(d(2025, 12, 11), "D", EventType::Snapshot, 218),
        )?;
        let mut date = d(2025, 12, 12);
        while date <= d(2026, 2, 5) {
            sales_repo::upsert(tx, date, "D", 2, false)?;
            ledger_repo::append(tx, &Transaction::new(date, "D", EventType::Sale, 2))?;
            date += Duration::days(1);
        }
        // Lot book matching the ledger on-hand (218 - 112 = 106).
        let check = d(2026, 2, 6);
        for (suffix, days, qty) in [("a", 30, 50), ("b", 18, 25), ("c", 10, 15), ("d", 5, 16)] {
            lots_repo::upsert_add(
                tx,
                &stockpilot::Lot {
                    lot_id: format!("seed-{}", suffix),
                    sku: "D".to_string(),
                    expiry_date: check + Duration::days(days),
                    qty_on_hand: qty,
                    receipt_ref: None,
                    receipt_date: None,
                },
            )?;
        }
        Ok(())
    })
    .unwrap();

    let proposal = workflow::proposal_for_sku(&db, "D", d(2026, 2, 6), Lane::Standard).unwrap();
    // Plenty of stock: nothing to order, but the waste risk is reported.
    let risk = proposal.breakdown.waste_risk_percent.unwrap();
    assert!(risk > 15.0, "risk = {}", risk);
    let penalty = proposal.breakdown.penalty.unwrap();
    assert!(penalty.applied);
    assert!(penalty.qty_after <= penalty.qty_before);
}

/// A diverged lot book forces the conservative fallback: no waste risk,
/// no penalty.
#[test]
fn diverged_lot_book_degrades_shelf_life() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.write(|tx| {
        let mut sku = Sku::new("E", "Perishable E");
        sku.shelf_life_days = 30;
        sku.waste_penalty_mode = WastePenaltyMode::Hard;
        sku.waste_risk_threshold = 1.0;
        sku_repo::upsert(tx, &sku)?;
        ledger_repo::append(
            tx,
            &Transaction::new(d(2026, 1, 1), "E", EventType::Snapshot, 100),
        )?;
        // Lot book only knows about 10 of the 100: divergence.
        lots_repo::upsert_add(
            tx,
            &stockpilot::Lot {
                lot_id: "only".to_string(),
                sku: "E".to_string(),
                expiry_date: d(2026, 2, 10),
                qty_on_hand: 10,
                receipt_ref: None,
                receipt_date: None,
            },
        )?;
        let mut date = d(2026, 1, 2);
        while date <= d(2026, 2, 5) {
            sales_repo::upsert(tx, date, "E", 1, false)?;
            ledger_repo::append(tx, &Transaction::new(date, "E", EventType::Sale, 1))?;
            date += Duration::days(1);
        }
        Ok(())
    })
    .unwrap();

    let proposal = workflow::proposal_for_sku(&db, "E", d(2026, 2, 6), Lane::Standard).unwrap();
    assert!(proposal.breakdown.penalty.is_none());
    assert!(proposal.breakdown.waste_risk_percent.is_none());
}

/// Stock-out days are censored and excluded from the fit; the count is
/// preserved in the breakdown.
#[test]
fn censored_days_counted_and_excluded() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.write(|tx| {
        sku_repo::upsert(tx, &Sku::new("G", "Scenario G"))?;
        // 40 units at 4/day: out of stock after ten days.
        ledger_repo::append(
            tx,
            &Transaction::new(d(2026, 1, 1), "G", EventType::Snapshot, 40),
        )?;
        let mut date = d(2026, 1, 1);
        while date <= d(2026, 2, 5) {
            let sold = if date <= d(2026, 1, 10) { 4 } else { 0 };
            sales_repo::upsert(tx, date, "G", sold, false)?;
            if sold > 0 {
                ledger_repo::append(tx, &Transaction::new(date, "G", EventType::Sale, sold))?;
            }
            date += Duration::days(1);
        }
        Ok(())
    })
    .unwrap();

    let proposal = workflow::proposal_for_sku(&db, "G", d(2026, 2, 6), Lane::Standard).unwrap();
    // 01-11 through 02-06 are stock-out days with zero sales.
    assert!(proposal.breakdown.n_censored >= 20);
    // The model still sees real demand: ~4/day, not the censored zeros.
    assert!(
        proposal.breakdown.mu_p > 1.0,
        "mu_p = {} should reflect pre-stockout demand",
        proposal.breakdown.mu_p
    );
    assert!(proposal.qty > 0);
}

/// Confirmation writes orders + ledger atomically and receipt closure
/// against those orders round-trips through stock.
#[test]
fn confirm_then_receive_round_trip() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    seed_steady_sku(&db, "H", 0);

    let friday = d(2026, 2, 6);
    let proposal = workflow::proposal_for_sku(&db, "H", friday, Lane::Standard).unwrap();
    assert!(proposal.qty > 0);

    let confirmed = workflow::confirm_orders(
        &db,
        friday,
        &[workflow::ConfirmationItem::from_proposal(&proposal)],
        "test",
    )
    .unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].order_id, "20260206_001");

    // Pipeline now carries the order; a second proposal wants nothing.
    let after = workflow::proposal_for_sku(&db, "H", friday, Lane::Standard).unwrap();
    assert_eq!(after.qty, 0);

    // The goods arrive and close the order.
    let outcome = workflow::close_receipt(
        &db,
        "DDT-H1",
        proposal.receipt_date,
        &[ReceiptItem {
            sku: "H".to_string(),
            qty_received: proposal.qty,
            target_order_ids: vec![confirmed[0].order_id.clone()],
        }],
        false,
        "test",
    )
    .unwrap();
    assert!(!outcome.already_processed());

    db.read(|conn| {
        let order = orders_repo::get(conn, &confirmed[0].order_id)?;
        assert_eq!(order.status, OrderStatus::Received);
        let txs = ledger_repo::list_until(conn, "H", proposal.receipt_date)?;
        let stock = stock_asof("H", proposal.receipt_date, &txs);
        assert_eq!(stock.on_order, 0);
        assert!(stock.on_hand >= proposal.qty);
        Ok(())
    })
    .unwrap();
}

/// End-of-day closure folds the sales aggregate exactly once and keeps
/// the lot book aligned with the ledger.
#[test]
fn eod_closure_keeps_lots_reconciled() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.write(|tx| {
        let mut sku = Sku::new("P", "Perishable P");
        sku.shelf_life_days = 20;
        sku_repo::upsert(tx, &sku)?;
        ledger_repo::append(
            tx,
            &Transaction::new(d(2026, 2, 1), "P", EventType::Snapshot, 30),
        )?;
        lots_repo::upsert_add(
            tx,
            &stockpilot::Lot {
                lot_id: "p1".to_string(),
                sku: "P".to_string(),
                expiry_date: d(2026, 2, 12),
                qty_on_hand: 30,
                receipt_ref: None,
                receipt_date: None,
            },
        )?;
        sales_repo::upsert(tx, d(2026, 2, 2), "P", 12, false)?;
        Ok(())
    })
    .unwrap();

    workflow::close_day(&db, d(2026, 2, 2), &BTreeMap::new(), "test").unwrap();

    db.read(|conn| {
        let txs = ledger_repo::list_until(conn, "P", d(2026, 2, 2))?;
        let stock = stock_asof("P", d(2026, 2, 2), &txs);
        assert_eq!(stock.on_hand, 18);
        assert_eq!(lots_repo::total_on_hand(conn, "P")?, 18);
        Ok(())
    })
    .unwrap();

    // Closing the same day again must not double-fold the aggregate.
    workflow::close_day(&db, d(2026, 2, 2), &BTreeMap::new(), "test").unwrap();
    db.read(|conn| {
        let txs = ledger_repo::list_until(conn, "P", d(2026, 2, 2))?;
        assert_eq!(stock_asof("P", d(2026, 2, 2), &txs).on_hand, 18);
        Ok(())
    })
    .unwrap();
}

/// Batch proposal generation covers the assortment and respects the
/// cancellation flag between SKUs.
#[test]
fn batch_generation_over_assortment() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    seed_steady_sku(&db, "S1", 0);
    seed_steady_sku(&db, "S2", 500);
    db.write(|tx| {
        let mut retired = Sku::new("S3", "Retired");
        retired.in_assortment = false;
        sku_repo::upsert(tx, &retired)?;
        Ok(())
    })
    .unwrap();

    let cancel = AtomicBool::new(false);
    let proposals =
        workflow::batch_proposals(&db, d(2026, 2, 6), Lane::Standard, &cancel).unwrap();
    // Retired SKU excluded; S1 needs stock, S2 does not.
    assert_eq!(proposals.len(), 2);
    let s1 = proposals.iter().find(|p| p.sku == "S1").unwrap();
    let s2 = proposals.iter().find(|p| p.sku == "S2").unwrap();
    assert!(s1.qty > 0);
    assert_eq!(s2.qty, 0);
}
