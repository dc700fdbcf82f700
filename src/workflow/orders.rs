//! Order Confirmation Workflow
//!
//! Turns confirmed proposals into persisted orders: the deterministic
//! `YYYYMMDD_NNN` id is sequenced under the writer lock, and the ORDER
//! ledger event, the order-log row and the audit entry all land in one
//! atomic transaction. Any failure rolls the whole batch back.

use chrono::NaiveDate;
use tracing::info;

use crate::calendar::Lane;
use crate::error::{CoreError, CoreResult};
use crate::models::{EventType, OrderLog, OrderStatus, Transaction};
use crate::policy::Proposal;
use crate::store::{audit_repo, ledger_repo, orders_repo, sku_repo, Database};

/// One confirmed line: what the operator accepted.
#[derive(Debug, Clone)]
pub struct ConfirmationItem {
    pub sku: String,
    pub lane: Lane,
    pub qty: i64,
    pub receipt_date: NaiveDate,
    /// Promo/event metadata carried onto the order for traceability.
    pub uplift_meta: Option<String>,
}

impl ConfirmationItem {
    pub fn from_proposal(proposal: &Proposal) -> Self {
        let uplift_meta = (proposal.breakdown.promo_uplift_factor.is_some()
            || proposal.breakdown.event_uplift_factor.is_some())
        .then(|| {
            serde_json::json!({
                "promo_factor": proposal.breakdown.promo_uplift_factor,
                "event_factor": proposal.breakdown.event_uplift_factor,
            })
            .to_string()
        });
        Self {
            sku: proposal.sku.clone(),
            lane: proposal.lane,
            qty: proposal.qty,
            receipt_date: proposal.receipt_date,
            uplift_meta,
        }
    }
}

/// A persisted order, echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedOrder {
    pub order_id: String,
    pub sku: String,
    pub qty: i64,
    pub receipt_date: NaiveDate,
}

/// Persist a batch of confirmed lines. Zero-quantity lines are skipped;
/// the remainder writes atomically.
pub fn confirm_orders(
    db: &Database,
    order_date: NaiveDate,
    items: &[ConfirmationItem],
    actor: &str,
) -> CoreResult<Vec<ConfirmedOrder>> {
    let lines: Vec<&ConfirmationItem> = items.iter().filter(|i| i.qty > 0).collect();
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    for line in &lines {
        if line.qty < 0 {
            return Err(CoreError::InvalidInput(format!(
                "negative confirmed quantity for {}",
                line.sku
            )));
        }
    }

    db.write(|tx| {
        let mut confirmed = Vec::with_capacity(lines.len());
        for line in &lines {
            // Explicit existence check: a clean NotFound beats an FK error.
            if !sku_repo::exists(tx, &line.sku)? {
                return Err(CoreError::NotFound(
                    crate::error::Entity::Sku,
                    line.sku.clone(),
                ));
            }
            let seq = orders_repo::next_sequence_for_day(tx, order_date)?;
            let order_id = format!("{}_{:03}", order_date.format("%Y%m%d"), seq);

            ledger_repo::append(
                tx,
                &Transaction::new(order_date, &line.sku, EventType::Order, line.qty)
                    .with_receipt_date(line.receipt_date)
                    .with_note(&order_id),
            )?;
            orders_repo::insert(
                tx,
                &OrderLog {
                    order_id: order_id.clone(),
                    sku: line.sku.clone(),
                    order_date,
                    receipt_date: line.receipt_date,
                    qty_ordered: line.qty,
                    qty_received: 0,
                    status: OrderStatus::Pending,
                    uplift_meta: line.uplift_meta.clone(),
                },
            )?;
            audit_repo::append(
                tx,
                actor,
                "confirm_order",
                Some(&line.sku),
                Some(&format!(
                    "order_id={} lane={} qty={}",
                    order_id,
                    line.lane.as_str(),
                    line.qty
                )),
            )?;
            confirmed.push(ConfirmedOrder {
                order_id,
                sku: line.sku.clone(),
                qty: line.qty,
                receipt_date: line.receipt_date,
            });
        }
        info!(count = confirmed.len(), date = %order_date, "orders confirmed");
        Ok(confirmed)
    })
}
