//! Ledger AsOf Calculator
//!
//! The transaction log is the sole source of truth for stock quantities.
//! This module folds a SKU's events up to an AsOf date into a `Stock`
//! value, under a stable in-day ordering so the same transaction set always
//! yields the same result regardless of insertion order. Pure functions,
//! no I/O.

use chrono::NaiveDate;

use crate::models::{EventType, Stock, Transaction};

/// Stable sort key: date, then in-day priority, then surrogate id.
/// Rows not yet persisted (id = None) sort after persisted rows of the
/// same priority, preserving append order via their slice position.
fn sort_key(tx: &Transaction, position: usize) -> (NaiveDate, u8, i64, usize) {
    (
        tx.date,
        tx.event.fold_priority(),
        tx.id.unwrap_or(i64::MAX),
        position,
    )
}

/// Apply one event to a running stock value. Audit kinds are no-ops.
fn apply(stock: &mut Stock, tx: &Transaction) {
    match tx.event {
        EventType::Snapshot => stock.on_hand = tx.qty,
        EventType::Order => stock.on_order += tx.qty,
        EventType::Receipt => {
            stock.on_order -= tx.qty;
            stock.on_hand += tx.qty;
        }
        // Consumption never drives on_hand below zero; the remainder is a
        // silent loss unless an UNFULFILLED event records it.
        EventType::Sale | EventType::Waste => {
            stock.on_hand -= tx.qty.min(stock.on_hand).max(0);
        }
        EventType::Adjust => stock.on_hand = tx.qty,
        EventType::Unfulfilled => stock.unfulfilled += tx.qty,
        EventType::SkuEdit
        | EventType::AssortmentIn
        | EventType::AssortmentOut
        | EventType::ExportLog => {}
    }
}

/// Stock for `sku` at end of `asof`, folded from `transactions`.
///
/// Events for other SKUs and events dated after `asof` are ignored, so the
/// caller may pass an unfiltered slice.
pub fn stock_asof(sku: &str, asof: NaiveDate, transactions: &[Transaction]) -> Stock {
    let mut relevant: Vec<(usize, &Transaction)> = transactions
        .iter()
        .enumerate()
        .filter(|(_, tx)| tx.sku == sku && tx.date <= asof)
        .collect();
    relevant.sort_by_key(|(pos, tx)| sort_key(tx, *pos));

    let mut stock = Stock::default();
    for (_, tx) in &relevant {
        apply(&mut stock, tx);
    }
    stock
}

/// Projected inventory position at `target`, seen from `asof`:
/// on-hand now, plus open orders due by `target`, minus unfulfilled
/// backlog. RECEIPT events already moved their quantity out of on_order in
/// the fold, so only still-open ORDER quantity due in the window counts.
pub fn projected_position(
    sku: &str,
    asof: NaiveDate,
    target: NaiveDate,
    transactions: &[Transaction],
) -> i64 {
    let stock = stock_asof(sku, asof, transactions);

    let mut ordered_due: i64 = 0;
    let mut received: i64 = 0;
    for tx in transactions.iter().filter(|t| t.sku == sku && t.date <= asof) {
        match tx.event {
            EventType::Order => {
                if tx.receipt_date.map(|r| r <= target).unwrap_or(false) {
                    ordered_due += tx.qty;
                }
            }
            EventType::Receipt => received += tx.qty,
            _ => {}
        }
    }
    // Receipts consume the earliest outstanding order quantity; due
    // quantity cannot go negative.
    let open_due = (ordered_due - received).max(0).min(stock.on_order.max(0));
    stock.on_hand + open_due - stock.unfulfilled
}
