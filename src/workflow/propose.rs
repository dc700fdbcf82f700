//! Proposal Generation
//!
//! Gathers one consistent storage snapshot per SKU (ledger, lot book,
//! sales history, open pipeline, settings) and hands it to the policy.
//! Batch generation over the assortment is cooperatively cancelable
//! between SKUs.

use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::calendar::{Calendar, Lane};
use crate::error::CoreResult;
use crate::fefo;
use crate::forecast::censoring::{self, DayObservation};
use crate::ledger::stock_asof;
use crate::models::Sku;
use crate::policy::{self, PipelineOrder, PolicyInputs, PromoWindow, Proposal, SalesPoint};
use crate::settings::Settings;
use crate::store::{
    ledger_repo, lots_repo, orders_repo, sales_repo, settings_repo, sku_repo, Database,
};

/// How far ahead promo rows are scanned for planned-promo windows.
const PROMO_SCAN_DAYS: i64 = 60;

struct Gathered {
    sku: Sku,
    settings: Settings,
    calendar: Calendar,
    on_hand: i64,
    unfulfilled: i64,
    pipeline: Vec<PipelineOrder>,
    sales: Vec<SalesPoint>,
    censored: Vec<bool>,
    censoring: censoring::CensoringSummary,
    lots: Vec<crate::models::Lot>,
    lot_book_trusted: bool,
    planned_promos: Vec<PromoWindow>,
}

fn gather(conn: &Connection, sku_id: &str, order_date: NaiveDate) -> CoreResult<Gathered> {
    let sku = sku_repo::get(conn, sku_id)?;
    let settings = settings_repo::load(conn)?;
    let holidays = settings_repo::load_holidays(conn)?;
    let calendar = Calendar::from_settings(&settings.calendar, holidays)?;

    let transactions = ledger_repo::list_until(conn, sku_id, order_date)?;
    let stock = stock_asof(sku_id, order_date, &transactions);

    // Dense sales series over the forecasting lookback.
    let lookback = settings.intermittent_forecast.lookback_days.max(14);
    let window_start = order_date - Duration::days(lookback - 1);
    let sale_rows = sales_repo::list(conn, sku_id, window_start, order_date)?;
    let mut sales = Vec::with_capacity(lookback as usize);
    let mut observations = Vec::with_capacity(lookback as usize);
    for i in 0..lookback {
        let date = window_start + Duration::days(i);
        let row = sale_rows.iter().find(|s| s.date == date);
        let qty = row.map(|s| s.qty_sold).unwrap_or(0);
        sales.push(SalesPoint {
            date,
            qty: qty as f64,
            promo: row.map(|s| s.promo).unwrap_or(false),
        });
        observations.push(DayObservation {
            date,
            qty_sold: qty,
            on_hand_eod: stock_asof(sku_id, date, &transactions).on_hand,
        });
    }

    // Censoring: stock-outs plus UNFULFILLED events in the lookback.
    let censor_lookback = settings.reorder_engine.censoring_lookback_days;
    let unfulfilled_dates = ledger_repo::unfulfilled_dates(
        conn,
        sku_id,
        window_start - Duration::days(censor_lookback.max(0)),
        order_date,
    )?;
    let flags = censoring::flag_censored_days(&observations, &unfulfilled_dates, censor_lookback);
    let censoring_summary = censoring::summarize(&observations, &flags);
    let censored: Vec<bool> = flags.iter().map(|f| f.is_some()).collect();

    // Open pipeline with outstanding quantities.
    let pipeline = orders_repo::list_open(conn, sku_id)?
        .into_iter()
        .map(|o| PipelineOrder {
            receipt_date: o.receipt_date,
            qty: o.qty_ordered - o.qty_received,
        })
        .filter(|o| o.qty > 0)
        .collect();

    // Lot book plus the reconciliation gate.
    let lots = lots_repo::list_by_sku(conn, sku_id)?;
    let lot_book_trusted = if sku.is_perishable() {
        let status = fefo::reconcile(
            sku_id,
            &lots,
            stock.on_hand,
            settings.shelf_life_policy.reconcile_tolerance_units,
        );
        if !status.is_consistent() {
            warn!(sku = sku_id, "lot book untrusted; proposals use conservative shelf-life");
        }
        status.is_consistent()
    } else {
        true
    };

    // Pre-registered promo days ahead become planned windows.
    let future_rows = sales_repo::list(
        conn,
        sku_id,
        order_date + Duration::days(1),
        order_date + Duration::days(PROMO_SCAN_DAYS),
    )?;
    let planned_promos = future_rows
        .iter()
        .filter(|s| s.promo)
        .map(|s| PromoWindow {
            start: s.date,
            end: s.date,
        })
        .collect();

    Ok(Gathered {
        sku,
        settings,
        calendar,
        on_hand: stock.on_hand,
        unfulfilled: stock.unfulfilled,
        pipeline,
        sales,
        censored,
        censoring: censoring_summary,
        lots,
        lot_book_trusted,
        planned_promos,
    })
}

/// One proposal for one SKU.
pub fn proposal_for_sku(
    db: &Database,
    sku_id: &str,
    order_date: NaiveDate,
    lane: Lane,
) -> CoreResult<Proposal> {
    db.read(|conn| {
        // One read transaction, so every query sees the same snapshot.
        let snapshot = conn.unchecked_transaction()?;
        let g = gather(&snapshot, sku_id, order_date)?;
        let inputs = PolicyInputs {
            sku: &g.sku,
            order_date,
            lane,
            on_hand: g.on_hand,
            unfulfilled: g.unfulfilled,
            pipeline: g.pipeline.clone(),
            sales: &g.sales,
            censored: &g.censored,
            censoring: g.censoring.clone(),
            lots: &g.lots,
            lot_book_trusted: g.lot_book_trusted,
            planned_promos: g.planned_promos.clone(),
        };
        policy::propose(&inputs, &g.settings, &g.calendar)
    })
}

/// Friday pair: Saturday lane first, Monday against the augmented
/// pipeline, sharing one demand model.
pub fn friday_proposals_for_sku(
    db: &Database,
    sku_id: &str,
    order_date: NaiveDate,
) -> CoreResult<(Proposal, Proposal)> {
    db.read(|conn| {
        let snapshot = conn.unchecked_transaction()?;
        let g = gather(&snapshot, sku_id, order_date)?;
        let inputs = PolicyInputs {
            sku: &g.sku,
            order_date,
            lane: Lane::Saturday,
            on_hand: g.on_hand,
            unfulfilled: g.unfulfilled,
            pipeline: g.pipeline.clone(),
            sales: &g.sales,
            censored: &g.censored,
            censoring: g.censoring.clone(),
            lots: &g.lots,
            lot_book_trusted: g.lot_book_trusted,
            planned_promos: g.planned_promos.clone(),
        };
        policy::friday_dual_proposals(&inputs, &g.settings, &g.calendar)
    })
}

/// Proposals for the whole active assortment. Checks `cancel` between
/// SKUs; a cancellation returns what was computed so far.
pub fn batch_proposals(
    db: &Database,
    order_date: NaiveDate,
    lane: Lane,
    cancel: &AtomicBool,
) -> CoreResult<Vec<Proposal>> {
    let skus = db.read(|conn| {
        sku_repo::list(
            conn,
            &sku_repo::SkuFilter {
                in_assortment_only: true,
                ..Default::default()
            },
        )
    })?;

    let mut proposals = Vec::with_capacity(skus.len());
    for sku in &skus {
        if cancel.load(Ordering::Relaxed) {
            info!(done = proposals.len(), total = skus.len(), "batch canceled between SKUs");
            break;
        }
        match proposal_for_sku(db, &sku.sku, order_date, lane) {
            Ok(p) => proposals.push(p),
            Err(e) => {
                // One broken SKU must not sink the batch.
                warn!(sku = %sku.sku, error = %e, "proposal failed; skipping");
            }
        }
    }
    Ok(proposals)
}
