//! KPI Computation
//!
//! A recomputable metric pass per SKU over a lookback window: out-of-stock
//! rate, fill rate, forecast WMAPE/bias and a censoring-aware lost-sales
//! estimate. Results land in the kpi_snapshots table keyed by
//! `(sku, date, mode)` and may be recomputed at any time.

use chrono::{Duration, NaiveDate};

use crate::error::CoreResult;
use crate::forecast::censoring::{self, DayObservation};
use crate::forecast::select::{signed_bias, wmape};
use crate::forecast::{self};
use crate::ledger::stock_asof;
use crate::models::{ForecastMethod, KpiSnapshot};
use crate::store::{kpi_repo, ledger_repo, sales_repo, settings_repo, sku_repo, Database};

/// Compute and persist a KPI snapshot for one SKU at `asof`.
pub fn compute_for_sku(
    db: &Database,
    sku_id: &str,
    asof: NaiveDate,
    lookback_days: i64,
) -> CoreResult<KpiSnapshot> {
    let lookback = lookback_days.max(7);
    let snapshot = db.read(|conn| {
        let sku = sku_repo::get(conn, sku_id)?;
        let settings = settings_repo::load(conn)?;
        let transactions = ledger_repo::list_until(conn, sku_id, asof)?;
        let window_start = asof - Duration::days(lookback - 1);
        let sale_rows = sales_repo::list(conn, sku_id, window_start, asof)?;

        let mut observations = Vec::with_capacity(lookback as usize);
        let mut series = Vec::with_capacity(lookback as usize);
        for i in 0..lookback {
            let date = window_start + Duration::days(i);
            let qty = sale_rows
                .iter()
                .find(|s| s.date == date)
                .map(|s| s.qty_sold)
                .unwrap_or(0);
            observations.push(DayObservation {
                date,
                qty_sold: qty,
                on_hand_eod: stock_asof(sku_id, date, &transactions).on_hand,
            });
            series.push((date, qty as f64));
        }

        let unfulfilled = ledger_repo::unfulfilled_dates(
            conn,
            sku_id,
            window_start - Duration::days(settings.reorder_engine.censoring_lookback_days),
            asof,
        )?;
        let flags = censoring::flag_censored_days(
            &observations,
            &unfulfilled,
            settings.reorder_engine.censoring_lookback_days,
        );
        let censored: Vec<bool> = flags.iter().map(|f| f.is_some()).collect();

        // Out-of-stock rate: share of days ending with zero on hand.
        let oos_days = observations.iter().filter(|o| o.on_hand_eod == 0).count();
        let oos_rate = oos_days as f64 / lookback as f64;

        // Fill rate: demand served over demand seen, where censored days
        // count their expected demand as unserved.
        let model = forecast::fit_model(
            &series,
            &censored,
            ForecastMethod::Unset,
            &settings.intermittent_forecast,
        )
        .model;
        let mut served = 0.0;
        let mut demanded = 0.0;
        let mut lost = 0.0;
        for (i, obs) in observations.iter().enumerate() {
            let sold = obs.qty_sold as f64;
            if censored[i] {
                let expected = model.predict_single_day(obs.date);
                demanded += expected;
                lost += (expected - sold).max(0.0);
                served += sold;
            } else {
                demanded += sold;
                served += sold;
            }
        }
        let fill_rate = if demanded > 0.0 { (served / demanded).min(1.0) } else { 1.0 };

        // One-step forecast accuracy on the non-censored days.
        let mut actual = Vec::new();
        let mut predicted = Vec::new();
        for (i, (date, qty)) in series.iter().enumerate() {
            if censored[i] {
                continue;
            }
            actual.push(*qty);
            predicted.push(model.predict_single_day(*date));
        }
        let wmape_value = wmape(&actual, &predicted);
        let bias_value = signed_bias(&actual, &predicted);

        Ok(KpiSnapshot {
            sku: sku.sku,
            date: asof,
            mode: "standard".to_string(),
            oos_rate,
            fill_rate,
            wmape: wmape_value,
            bias: bias_value,
            lost_sales_estimate: lost,
            lookback_days: lookback,
        })
    })?;

    db.write(|tx| kpi_repo::upsert(tx, &snapshot))?;
    Ok(snapshot)
}
