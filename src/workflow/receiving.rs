//! Receipt Closure Workflow
//!
//! Closes a receiving document against open orders, idempotently keyed on
//! the document id. Order updates, RECEIPT and UNFULFILLED events, lot
//! creation, the receiving log and junction rows all happen in one
//! transaction; a duplicate document is a result variant, not an error.

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult, Entity};
use crate::models::{EventType, Lot, OrderStatus, ReceivingLog, Transaction};
use crate::store::{
    audit_repo, ledger_repo, lots_repo, orders_repo, receiving_repo, settings_repo, sku_repo,
    Database,
};

/// One line of an incoming document.
#[derive(Debug, Clone)]
pub struct ReceiptItem {
    pub sku: String,
    pub qty_received: i64,
    /// Explicit allocation targets; empty means open orders FIFO.
    pub target_order_ids: Vec<String>,
}

/// Quantity allocated to one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub order_id: String,
    pub qty: i64,
    pub status: OrderStatus,
}

/// What a successful closure changed.
#[derive(Debug, Clone, Default)]
pub struct ReceiptSummary {
    pub document_id: String,
    pub allocations: Vec<Allocation>,
    pub receipt_events: usize,
    pub unfulfilled_events: usize,
    pub lots_created: Vec<String>,
}

/// Result variant of the closure; a duplicate document is success with
/// `AlreadyProcessed` and an empty change set.
#[derive(Debug, Clone)]
pub enum ReceiptOutcome {
    Inserted(ReceiptSummary),
    AlreadyProcessed,
}

impl ReceiptOutcome {
    pub fn already_processed(&self) -> bool {
        matches!(self, ReceiptOutcome::AlreadyProcessed)
    }
}

/// Close a receiving document.
///
/// `close_short` declares every touched order closed even when the
/// allocation leaves it short; the residual is recorded as an UNFULFILLED
/// event so censoring sees the failed fulfillment.
pub fn close_receipt(
    db: &Database,
    document_id: &str,
    receipt_date: NaiveDate,
    items: &[ReceiptItem],
    close_short: bool,
    actor: &str,
) -> CoreResult<ReceiptOutcome> {
    if document_id.trim().is_empty() {
        return Err(CoreError::InvalidInput("document id must not be empty".into()));
    }
    if items.is_empty() {
        return Err(CoreError::InvalidInput(format!(
            "document {} has no items",
            document_id
        )));
    }
    for item in items {
        if item.qty_received <= 0 {
            return Err(CoreError::InvalidInput(format!(
                "document {} item {} quantity must be positive",
                document_id, item.sku
            )));
        }
    }

    db.write(|tx| {
        // Idempotency gate: a known document is a no-op success.
        if receiving_repo::exists(tx, document_id)? {
            info!(document_id, "receipt already processed; no-op");
            return Ok(ReceiptOutcome::AlreadyProcessed);
        }

        let settings = settings_repo::load(tx)?;
        let mut summary = ReceiptSummary {
            document_id: document_id.to_string(),
            ..Default::default()
        };

        for item in items {
            let sku = sku_repo::get(tx, &item.sku)?;

            // Resolve allocation targets.
            let targets = if item.target_order_ids.is_empty() {
                orders_repo::list_open(tx, &item.sku)?
            } else {
                let mut orders = Vec::with_capacity(item.target_order_ids.len());
                for order_id in &item.target_order_ids {
                    let order = orders_repo::get(tx, order_id)?;
                    if order.sku != item.sku {
                        return Err(CoreError::ConstraintViolation(format!(
                            "order {} is for sku {}, not {}",
                            order_id, order.sku, item.sku
                        )));
                    }
                    orders.push(order);
                }
                orders
            };

            // Allocate, capped so no order exceeds its ordered quantity.
            let mut remaining = item.qty_received;
            for order in &targets {
                if remaining == 0 {
                    break;
                }
                let open = order.qty_ordered - order.qty_received;
                if open <= 0 {
                    continue;
                }
                let take = open.min(remaining);
                let status =
                    orders_repo::update_received(tx, &order.order_id, order.qty_received + take)?;
                receiving_repo::link_order(tx, &order.order_id, document_id)?;
                summary.allocations.push(Allocation {
                    order_id: order.order_id.clone(),
                    qty: take,
                    status,
                });
                remaining -= take;
            }
            if remaining > 0 && !targets.is_empty() {
                info!(
                    document_id,
                    sku = %item.sku,
                    surplus = remaining,
                    "receipt exceeds open orders; surplus still booked to stock"
                );
            }

            // One RECEIPT event per item, dated with the actual arrival.
            ledger_repo::append(
                tx,
                &Transaction::new(receipt_date, &item.sku, EventType::Receipt, item.qty_received)
                    .with_receipt_date(receipt_date)
                    .with_note(document_id),
            )?;
            summary.receipt_events += 1;

            // Perishables get a lot per (document, expiry).
            if sku.is_perishable() {
                let effective_life = ((sku.shelf_life_days as f64)
                    * settings.shelf_life_policy.realization_factor.clamp(0.0, 1.0))
                .round() as i64;
                let expiry = receipt_date + Duration::days(effective_life.max(1));
                let lot = Lot {
                    lot_id: Lot::compose_id(document_id, &item.sku, expiry),
                    sku: item.sku.clone(),
                    expiry_date: expiry,
                    qty_on_hand: item.qty_received,
                    receipt_ref: Some(document_id.to_string()),
                    receipt_date: Some(receipt_date),
                };
                lots_repo::upsert_add(tx, &lot)?;
                summary.lots_created.push(lot.lot_id);
            }
        }

        // Declared-closed-short orders record their residual demand.
        if close_short {
            for allocation in summary
                .allocations
                .iter()
                .filter(|a| a.status == OrderStatus::Partial)
            {
                let order = orders_repo::get(tx, &allocation.order_id)?;
                let residual = order.qty_ordered - order.qty_received;
                if residual > 0 {
                    orders_repo::set_status(tx, &order.order_id, OrderStatus::Received)?;
                    ledger_repo::append(
                        tx,
                        &Transaction::new(
                            receipt_date,
                            &order.sku,
                            EventType::Unfulfilled,
                            residual,
                        )
                        .with_note(&format!("closed short: {}", order.order_id)),
                    )?;
                    summary.unfulfilled_events += 1;
                }
            }
        }

        // One receiving-log row per document; quantity is the document
        // total, sku the first line's.
        let total: i64 = items.iter().map(|i| i.qty_received).sum();
        receiving_repo::insert(
            tx,
            &ReceivingLog {
                document_id: document_id.to_string(),
                date: receipt_date,
                sku: items[0].sku.clone(),
                qty_received: total,
                receipt_date,
            },
        )?;

        audit_repo::append(
            tx,
            actor,
            "close_receipt",
            Some(&items[0].sku),
            Some(&format!(
                "document={} items={} total={}",
                document_id,
                items.len(),
                total
            )),
        )?;

        info!(
            document_id,
            allocations = summary.allocations.len(),
            receipts = summary.receipt_events,
            "receipt closed"
        );
        Ok(ReceiptOutcome::Inserted(summary))
    })
}

/// Manually declare an order closed short, outside any receipt. Emits the
/// residual UNFULFILLED event so both closure paths behave the same.
pub fn close_order_short(
    db: &Database,
    order_id: &str,
    date: NaiveDate,
    actor: &str,
) -> CoreResult<i64> {
    db.write(|tx| {
        let order = orders_repo::get(tx, order_id)?;
        if order.status == OrderStatus::Received {
            return Err(CoreError::ConstraintViolation(format!(
                "order {} is already closed",
                order_id
            )));
        }
        let residual = order.qty_ordered - order.qty_received;
        orders_repo::set_status(tx, order_id, OrderStatus::Received)?;
        if residual > 0 {
            ledger_repo::append(
                tx,
                &Transaction::new(date, &order.sku, EventType::Unfulfilled, residual)
                    .with_note(&format!("closed short: {}", order_id)),
            )?;
        }
        audit_repo::append(
            tx,
            actor,
            "close_order_short",
            Some(&order.sku),
            Some(&format!("order_id={} residual={}", order_id, residual)),
        )?;
        warn!(order_id, residual, "order declared closed short");
        Ok(residual)
    })
}

/// Read model: order ids linked to a document.
pub fn linked_orders(db: &Database, document_id: &str) -> CoreResult<Vec<String>> {
    db.read(|conn| {
        if !receiving_repo::exists(conn, document_id)? {
            return Err(CoreError::NotFound(Entity::Document, document_id.to_string()));
        }
        receiving_repo::orders_for_document(conn, document_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderLog, Sku};
    use crate::store::orders_repo;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn setup_with_orders() -> Database {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            let mut sku = Sku::new("B", "Rice 1kg");
            sku.shelf_life_days = 180;
            sku_repo::upsert(tx, &sku)?;
            for (id, qty) in [("O1", 20), ("O2", 30)] {
                orders_repo::insert(
                    tx,
                    &OrderLog {
                        order_id: id.to_string(),
                        sku: "B".to_string(),
                        order_date: d(2026, 2, 6),
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
        db
    }

    fn single_item(qty: i64, targets: &[&str]) -> Vec<ReceiptItem> {
        vec![ReceiptItem {
            sku: "B".to_string(),
            qty_received: qty,
            target_order_ids: targets.iter().map(|s| s.to_string()).collect(),
        }]
    }

    #[test]
    fn test_allocation_across_two_orders() {
        let db = setup_with_orders();
        let outcome = close_receipt(
            &db,
            "DDT-1",
            d(2026, 2, 9),
            &single_item(40, &["O1", "O2"]),
            false,
            "tester",
        )
        .unwrap();
        let summary = match outcome {
            ReceiptOutcome::Inserted(s) => s,
            _ => panic!("expected insert"),
        };
        assert_eq!(summary.allocations.len(), 2);
        assert_eq!(summary.allocations[0], Allocation {
            order_id: "O1".to_string(),
            qty: 20,
            status: OrderStatus::Received,
        });
        assert_eq!(summary.allocations[1].qty, 20);
        assert_eq!(summary.allocations[1].status, OrderStatus::Partial);
        assert_eq!(summary.receipt_events, 1);
        assert_eq!(summary.lots_created.len(), 1);

        db.read(|conn| {
            let o1 = orders_repo::get(conn, "O1")?;
            assert_eq!(o1.qty_received, 20);
            assert_eq!(o1.status, OrderStatus::Received);
            let o2 = orders_repo::get(conn, "O2")?;
            assert_eq!(o2.qty_received, 20);
            assert_eq!(o2.status, OrderStatus::Partial);
            let receipts: i64 = conn.query_row(
                "SELECT COALESCE(SUM(qty), 0) FROM transactions WHERE event = 'RECEIPT'",
                [],
                |row| row.get(0),
            )?;
            assert_eq!(receipts, 40);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_second_close_is_noop() {
        let db = setup_with_orders();
        close_receipt(&db, "DDT-1", d(2026, 2, 9), &single_item(40, &["O1", "O2"]), false, "t")
            .unwrap();
        let before: i64 = db
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?)
            })
            .unwrap();

        let again = close_receipt(
            &db,
            "DDT-1",
            d(2026, 2, 9),
            &single_item(40, &["O1", "O2"]),
            false,
            "t",
        )
        .unwrap();
        assert!(again.already_processed());

        let after: i64 = db
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_fifo_allocation_without_targets() {
        let db = setup_with_orders();
        close_receipt(&db, "DDT-2", d(2026, 2, 9), &single_item(25, &[]), false, "t").unwrap();
        db.read(|conn| {
            let o1 = orders_repo::get(conn, "O1")?;
            let o2 = orders_repo::get(conn, "O2")?;
            assert_eq!(o1.qty_received, 20);
            assert_eq!(o2.qty_received, 5);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_close_short_emits_unfulfilled() {
        let db = setup_with_orders();
        let outcome = close_receipt(
            &db,
            "DDT-3",
            d(2026, 2, 9),
            &single_item(25, &["O2"]),
            true,
            "t",
        )
        .unwrap();
        let summary = match outcome {
            ReceiptOutcome::Inserted(s) => s,
            _ => panic!(),
        };
        assert_eq!(summary.unfulfilled_events, 1);
        db.read(|conn| {
            let o2 = orders_repo::get(conn, "O2")?;
            assert_eq!(o2.status, OrderStatus::Received);
            assert_eq!(o2.qty_received, 25);
            let unfulfilled: i64 = conn.query_row(
                "SELECT COALESCE(SUM(qty), 0) FROM transactions WHERE event = 'UNFULFILLED'",
                [],
                |row| row.get(0),
            )?;
            assert_eq!(unfulfilled, 5);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_failed_item_rolls_back_everything() {
        let db = setup_with_orders();
        let items = vec![
            ReceiptItem {
                sku: "B".to_string(),
                qty_received: 10,
                target_order_ids: vec!["O1".to_string()],
            },
            ReceiptItem {
                sku: "MISSING".to_string(),
                qty_received: 5,
                target_order_ids: Vec::new(),
            },
        ];
        let result = close_receipt(&db, "DDT-4", d(2026, 2, 9), &items, false, "t");
        assert!(result.is_err());
        db.read(|conn| {
            assert!(!receiving_repo::exists(conn, "DDT-4")?);
            let o1 = orders_repo::get(conn, "O1")?;
            assert_eq!(o1.qty_received, 0);
            let events: i64 =
                conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?;
            assert_eq!(events, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_manual_close_short_matches_receipt_path() {
        let db = setup_with_orders();
        close_receipt(&db, "DDT-5", d(2026, 2, 9), &single_item(12, &["O1"]), false, "t").unwrap();
        let residual = close_order_short(&db, "O1", d(2026, 2, 10), "t").unwrap();
        assert_eq!(residual, 8);
        db.read(|conn| {
            let o1 = orders_repo::get(conn, "O1")?;
            assert_eq!(o1.status, OrderStatus::Received);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_linked_orders_read_model() {
        let db = setup_with_orders();
        close_receipt(&db, "DDT-6", d(2026, 2, 9), &single_item(40, &["O1", "O2"]), false, "t")
            .unwrap();
        let linked = linked_orders(&db, "DDT-6").unwrap();
        assert_eq!(linked, vec!["O1".to_string(), "O2".to_string()]);
        assert!(linked_orders(&db, "NOPE").is_err());
    }
}
