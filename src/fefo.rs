//! Lot Book and FEFO Engine
//!
//! First-expiry-first-out consumption planning over a SKU's lots, and the
//! lot-vs-ledger reconciliation gate that decides whether shelf-life logic
//! may trust the lot book at all. Planning is pure; persistence of the
//! resulting decrements happens in the lots repository inside the writing
//! transaction.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Lot;

/// One lot's share of a FEFO consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FefoConsumption {
    pub lot_id: String,
    pub qty: i64,
    /// Quantity remaining on the lot after this consumption.
    pub remaining: i64,
}

/// Result of applying FEFO, surfaced to callers instead of happening as a
/// hidden side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FefoOutcome {
    pub requested: i64,
    pub satisfied: i64,
    /// Demand that no lot could cover.
    pub shortfall: i64,
    pub consumed: Vec<FefoConsumption>,
}

/// Sort lots into FEFO order: earliest expiry first, lot id as tiebreak.
pub fn fefo_order(lots: &mut [Lot]) {
    lots.sort_by(|a, b| {
        a.expiry_date
            .cmp(&b.expiry_date)
            .then_with(|| a.lot_id.cmp(&b.lot_id))
    });
}

/// Plan a FEFO consumption of `qty` units against `lots`. Lots are
/// consumed in ascending (expiry, lot_id) order; the last touched lot may
/// be partially consumed; depleted lots are reported with `remaining = 0`
/// and left for the caller to persist or prune.
pub fn plan_consumption(lots: &[Lot], qty: i64) -> FefoOutcome {
    let requested = qty.max(0);
    let mut ordered: Vec<Lot> = lots.iter().filter(|l| l.qty_on_hand > 0).cloned().collect();
    fefo_order(&mut ordered);

    let mut remaining_demand = requested;
    let mut consumed = Vec::new();
    for lot in &ordered {
        if remaining_demand == 0 {
            break;
        }
        let take = lot.qty_on_hand.min(remaining_demand);
        consumed.push(FefoConsumption {
            lot_id: lot.lot_id.clone(),
            qty: take,
            remaining: lot.qty_on_hand - take,
        });
        remaining_demand -= take;
    }

    FefoOutcome {
        requested,
        satisfied: requested - remaining_demand,
        shortfall: remaining_demand,
        consumed,
    }
}

/// Whether the lot book agrees with the ledger at AsOf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileStatus {
    Consistent,
    /// Divergence beyond tolerance: shelf-life logic must degrade to the
    /// conservative fallback. Never silently repaired.
    Diverged { lots_total: i64, ledger_on_hand: i64 },
}

impl ReconcileStatus {
    pub fn is_consistent(&self) -> bool {
        matches!(self, ReconcileStatus::Consistent)
    }
}

/// Compare lot totals with the ledger's on-hand, within `tolerance` units.
pub fn reconcile(sku: &str, lots: &[Lot], ledger_on_hand: i64, tolerance: i64) -> ReconcileStatus {
    let lots_total: i64 = lots.iter().map(|l| l.qty_on_hand).sum();
    if (lots_total - ledger_on_hand).abs() <= tolerance.max(0) {
        ReconcileStatus::Consistent
    } else {
        warn!(
            sku,
            lots_total, ledger_on_hand, "lot book diverges from ledger; shelf-life degraded"
        );
        ReconcileStatus::Diverged {
            lots_total,
            ledger_on_hand,
        }
    }
}
