//! Shelf-Life Analyzer
//!
//! Classifies a SKU's lots into expired, below-minimum-residual-life,
//! expiring-soon and safe buckets, estimates waste risk (optionally
//! demand-adjusted by simulating FEFO consumption forward), and applies
//! the soft/hard order-quantity penalty.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::fefo::fefo_order;
use crate::models::{Lot, WastePenaltyMode};

/// Quantity split at a check date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShelfLifeReport {
    pub total_on_hand: i64,
    pub usable_qty: i64,
    pub unusable_qty: i64,
    pub expiring_soon_qty: i64,
    pub waste_risk_percent: f64,
}

/// Classify `lots` at `check_date`.
///
/// Days-until-expiry `d` buckets: `d < 0` expired; `0 <= d < min_life`
/// unusable (insufficient residual life); `min_life <= d <= horizon`
/// usable but expiring soon; `d > horizon` safe.
pub fn analyze(
    lots: &[Lot],
    check_date: NaiveDate,
    min_shelf_life_days: i64,
    waste_horizon_days: i64,
) -> ShelfLifeReport {
    let mut report = ShelfLifeReport::default();
    for lot in lots {
        if lot.qty_on_hand <= 0 {
            continue;
        }
        let d = (lot.expiry_date - check_date).num_days();
        report.total_on_hand += lot.qty_on_hand;
        if d < min_shelf_life_days {
            report.unusable_qty += lot.qty_on_hand;
        } else {
            report.usable_qty += lot.qty_on_hand;
            if d <= waste_horizon_days {
                report.expiring_soon_qty += lot.qty_on_hand;
            }
        }
    }
    report.waste_risk_percent =
        100.0 * report.expiring_soon_qty as f64 / report.total_on_hand.max(1) as f64;
    report
}

/// Conservative fallback used when the lot book cannot be trusted: no
/// usable/unusable split and no waste risk, so no penalty fires.
pub fn conservative_fallback(ledger_on_hand: i64) -> ShelfLifeReport {
    ShelfLifeReport {
        total_on_hand: ledger_on_hand,
        usable_qty: ledger_on_hand,
        unusable_qty: 0,
        expiring_soon_qty: 0,
        waste_risk_percent: 0.0,
    }
}

/// Append a virtual lot for a proposed incoming quantity, so waste risk
/// can be probed before the order exists.
pub fn with_incoming(
    lots: &[Lot],
    sku: &str,
    qty: i64,
    receipt_date: NaiveDate,
    shelf_life_days: i64,
) -> Vec<Lot> {
    let mut combined = lots.to_vec();
    if qty > 0 && shelf_life_days > 0 {
        combined.push(Lot {
            lot_id: Lot::compose_id("incoming", sku, receipt_date + Duration::days(shelf_life_days)),
            sku: sku.to_string(),
            expiry_date: receipt_date + Duration::days(shelf_life_days),
            qty_on_hand: qty,
            receipt_ref: None,
            receipt_date: Some(receipt_date),
        });
    }
    combined
}

/// Demand-adjusted waste risk: simulate FEFO at a daily rate `lambda`.
/// Every unexpired lot absorbs demand in FEFO order, each limited to its
/// own remaining window net of the days earlier lots already consumed;
/// waste accrues for lots expiring inside the horizon. Returns the plain
/// risk when `lambda <= 0`.
pub fn demand_adjusted_risk(
    lots: &[Lot],
    check_date: NaiveDate,
    lambda: f64,
    min_shelf_life_days: i64,
    waste_horizon_days: i64,
) -> f64 {
    let report = analyze(lots, check_date, min_shelf_life_days, waste_horizon_days);
    if lambda <= 0.0 {
        return report.waste_risk_percent;
    }
    let total: i64 = lots.iter().map(|l| l.qty_on_hand.max(0)).sum();
    if total == 0 {
        return 0.0;
    }

    let mut ordered: Vec<Lot> = lots.iter().filter(|l| l.qty_on_hand > 0).cloned().collect();
    fefo_order(&mut ordered);

    let mut consumed_days = 0.0_f64;
    let mut expected_waste = 0.0_f64;
    for lot in &ordered {
        let d = (lot.expiry_date - check_date).num_days();
        if d < 0 {
            continue;
        }
        let window = (d as f64 - consumed_days).max(0.0);
        let capacity = lambda * window;
        let lot_qty = lot.qty_on_hand as f64;
        let consumption = lot_qty.min(capacity);
        if d <= waste_horizon_days {
            expected_waste += (lot_qty - capacity).max(0.0);
        }
        consumed_days += consumption / lambda;
    }

    100.0 * expected_waste / total as f64
}

/// Outcome of a penalty application, kept for the proposal breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyOutcome {
    pub mode: WastePenaltyMode,
    pub waste_risk_percent: f64,
    pub threshold_percent: f64,
    pub applied: bool,
    pub qty_before: i64,
    pub qty_after: i64,
}

/// Apply the configured penalty to a proposed quantity. Soft mode scales
/// the quantity down; hard mode zeroes it. Constraints are re-applied by
/// the caller afterwards.
pub fn apply_penalty(
    qty: i64,
    waste_risk_percent: f64,
    mode: WastePenaltyMode,
    factor: f64,
    threshold_percent: f64,
) -> PenaltyOutcome {
    let fires = mode != WastePenaltyMode::None && waste_risk_percent >= threshold_percent;
    let qty_after = if !fires {
        qty
    } else {
        match mode {
            WastePenaltyMode::None => qty,
            WastePenaltyMode::Soft => ((qty as f64) * (1.0 - factor)).round() as i64,
            WastePenaltyMode::Hard => 0,
        }
    };
    PenaltyOutcome {
        mode,
        waste_risk_percent,
        threshold_percent,
        applied: fires,
        qty_before: qty,
        qty_after,
    }
}
