//! Replenishment Policy
//!
//! Combines the calendar protection window, the fitted demand model, the
//! robust sigma estimate and the constraint chain into an order proposal.
//! Every intermediate lands in the breakdown so an operator can see why a
//! quantity was proposed. Pure: all state arrives through `PolicyInputs`.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::{Calendar, Lane, ProtectionWindow};
use crate::error::CoreResult;
use crate::forecast::censoring::CensoringSummary;
use crate::forecast::{self, FitOutcome, Model};
use crate::models::{ForecastMethod, Lot, Sku, WastePenaltyMode};
use crate::settings::Settings;
use crate::shelf_life::{self, PenaltyOutcome};
use crate::uncertainty::{self, SigmaEstimator};

/// An outstanding order in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOrder {
    pub receipt_date: NaiveDate,
    pub qty: i64,
}

/// One day of sales history with its promo flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalesPoint {
    pub date: NaiveDate,
    pub qty: f64,
    pub promo: bool,
}

/// A planned promo window, used for uplift overlap checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PromoWindow {
    fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Everything the policy needs for one SKU.
#[derive(Debug, Clone)]
pub struct PolicyInputs<'a> {
    pub sku: &'a Sku,
    pub order_date: NaiveDate,
    pub lane: Lane,
    pub on_hand: i64,
    pub unfulfilled: i64,
    pub pipeline: Vec<PipelineOrder>,
    pub sales: &'a [SalesPoint],
    pub censored: &'a [bool],
    pub censoring: CensoringSummary,
    pub lots: &'a [Lot],
    /// False when lot-vs-ledger reconciliation diverged; shelf-life logic
    /// then runs in the conservative fallback.
    pub lot_book_trusted: bool,
    pub planned_promos: Vec<PromoWindow>,
}

/// Where the safety stock came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetySource {
    Residuals { estimator: String, n_residuals: usize },
    /// Too few residuals; σ_P approximated from the intermittent size
    /// estimate.
    SizeFallback,
    /// No usable estimate at all; the SKU's configured safety stock.
    Configured,
}

/// One recorded constraint transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintStep {
    pub name: String,
    pub before: i64,
    pub after: i64,
}

/// The full explainability record for one proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub sku: String,
    pub order_date: NaiveDate,
    pub lane: Lane,
    pub r1: NaiveDate,
    pub r2: NaiveDate,
    pub protection_days: i64,
    pub method: String,
    pub mu_p_base: f64,
    pub promo_uplift_factor: Option<f64>,
    pub event_uplift_factor: Option<f64>,
    pub post_promo_damping: Option<f64>,
    pub mu_p: f64,
    pub sigma_day: Option<f64>,
    pub sigma_p: f64,
    pub z_alpha: f64,
    pub safety_stock: f64,
    pub safety_source: SafetySource,
    pub reorder_target: f64,
    pub inventory_position: i64,
    pub q_raw: f64,
    pub n_censored: usize,
    pub censor_reasons: Vec<String>,
    pub waste_risk_percent: Option<f64>,
    pub penalty: Option<PenaltyOutcome>,
    pub constraints: Vec<ConstraintStep>,
    pub cap_reason: Option<String>,
    pub qty: i64,
}

/// The proposal handed to the confirmation workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub sku: String,
    pub lane: Lane,
    pub order_date: NaiveDate,
    pub receipt_date: NaiveDate,
    pub qty: i64,
    pub breakdown: Breakdown,
}

fn winsorized_mean(values: &[f64], fraction: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let k = ((n as f64) * fraction.clamp(0.0, 0.45)).floor() as usize;
    let lo = sorted[k];
    let hi = sorted[n - 1 - k];
    let sum: f64 = sorted.iter().map(|v| v.clamp(lo, hi)).sum();
    Some(sum / n as f64)
}

/// Historical promo uplift factor: winsorized promo-day mean over
/// winsorized non-promo mean, capped, guarded by a minimum event count.
fn promo_uplift_factor(inputs: &PolicyInputs<'_>, settings: &Settings) -> Option<f64> {
    let cfg = &settings.promo_uplift;
    if !cfg.enabled {
        return None;
    }
    let mut promo = Vec::new();
    let mut regular = Vec::new();
    for (i, point) in inputs.sales.iter().enumerate() {
        if inputs.censored.get(i).copied().unwrap_or(false) {
            continue;
        }
        if point.promo {
            promo.push(point.qty.max(0.0));
        } else {
            regular.push(point.qty.max(0.0));
        }
    }
    if (promo.len() as i64) < cfg.min_promo_days {
        return None;
    }
    let promo_mean = winsorized_mean(&promo, cfg.winsor_fraction)?;
    let regular_mean = winsorized_mean(&regular, cfg.winsor_fraction)?;
    if regular_mean <= f64::EPSILON {
        return None;
    }
    Some((promo_mean / regular_mean).clamp(1.0, cfg.max_factor.max(1.0)))
}

/// Event-uplift multiplier for the arrival date: product of matching
/// rules, capped.
fn event_uplift_factor(r1: NaiveDate, settings: &Settings) -> Option<f64> {
    let cfg = &settings.event_uplift;
    if !cfg.enabled || cfg.rules.is_empty() {
        return None;
    }
    let mut factor = 1.0;
    let mut matched = false;
    for rule in &cfg.rules {
        let start = NaiveDate::parse_from_str(&rule.start_date, "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(&rule.end_date, "%Y-%m-%d").ok()?;
        if start <= r1 && r1 <= end {
            factor *= rule.factor.max(1.0);
            matched = true;
        }
    }
    if !matched {
        return None;
    }
    Some(factor.min(cfg.max_factor.max(1.0)))
}

/// Expected window demand with per-day promo scaling.
fn window_demand(
    model: &Model,
    window: &ProtectionWindow,
    promo_factor: Option<f64>,
    planned_promos: &[PromoWindow],
) -> (f64, f64) {
    let mut base = 0.0;
    let mut uplifted = 0.0;
    for i in 0..window.days.max(0) {
        let date = window.r1 + Duration::days(i);
        let daily = model.predict_single_day(date);
        base += daily;
        let in_promo = planned_promos.iter().any(|w| w.contains(date));
        uplifted += match (in_promo, promo_factor) {
            (true, Some(f)) => daily * f,
            _ => daily,
        };
    }
    (base, uplifted)
}

/// Effective CSL: the SKU's own target when set, the demand-class cluster
/// (or global default) otherwise.
fn effective_csl(sku: &Sku, settings: &Settings) -> f64 {
    if sku.target_csl > 0.0 {
        sku.target_csl
    } else {
        settings.csl_for_class(sku.demand_class.as_str())
    }
}

/// Map a fitted model back to a concrete refit method so residual
/// estimation replays the same family without re-running selection.
fn concrete_method(model: &Model) -> ForecastMethod {
    match model.method_label() {
        "croston" => ForecastMethod::Croston,
        "sba" => ForecastMethod::Sba,
        "tsb" => ForecastMethod::Tsb,
        _ => ForecastMethod::Simple,
    }
}

/// Constraint chain: pack rounding up, MOQ gate, max-stock cap. Records
/// each step that changed the quantity; returns the cap reason when the
/// cap forced the proposal to zero.
fn apply_constraints(
    q_start: i64,
    sku: &Sku,
    inventory_position: i64,
) -> (i64, Vec<ConstraintStep>, Option<String>) {
    let mut steps = Vec::new();
    let mut q = q_start.max(0);

    // Round up to a pack multiple.
    let pack = sku.pack_size.max(1);
    if q > 0 && q % pack != 0 {
        let rounded = ((q + pack - 1) / pack) * pack;
        steps.push(ConstraintStep {
            name: "pack_size".to_string(),
            before: q,
            after: rounded,
        });
        q = rounded;
    }

    // Below MOQ the proposal is dropped, not raised.
    if q > 0 && q < sku.moq {
        steps.push(ConstraintStep {
            name: "moq".to_string(),
            before: q,
            after: 0,
        });
        q = 0;
    }

    // Cap so projected stock after arrival stays under max_stock.
    let mut cap_reason = None;
    if sku.max_stock > 0 && q > 0 && inventory_position + q > sku.max_stock {
        let before = q;
        let mut capped = (sku.max_stock - inventory_position).max(0);
        // Re-align downward to a pack multiple.
        capped -= capped % pack;
        if capped < sku.moq {
            capped = 0;
            cap_reason = Some("max_stock_cap".to_string());
        }
        steps.push(ConstraintStep {
            name: "max_stock".to_string(),
            before,
            after: capped,
        });
        q = capped;
    }

    (q, steps, cap_reason)
}

/// Shelf-life parameter resolution: per-SKU override wins when set,
/// category minimum next, settings last.
fn resolve_shelf_life(
    sku: &Sku,
    settings: &Settings,
) -> (i64, i64, WastePenaltyMode, f64, f64) {
    let policy = &settings.shelf_life_policy;
    let min_life = if sku.min_shelf_life_days > 0 {
        sku.min_shelf_life_days
    } else {
        sku.category
            .as_deref()
            .and_then(|c| policy.category_min_life.get(c).copied())
            .unwrap_or(policy.min_shelf_life_days)
    };
    let (mode, factor, threshold) = if sku.waste_penalty_mode != WastePenaltyMode::None {
        (
            sku.waste_penalty_mode,
            sku.waste_penalty_factor,
            sku.waste_risk_threshold,
        )
    } else {
        (
            policy.penalty_mode,
            policy.penalty_factor,
            policy.risk_threshold_percent,
        )
    };
    (min_life, policy.waste_horizon_days, mode, factor, threshold)
}

/// Compute a proposal from an already-fitted model. Shared by the single
/// entry point and the Friday dual-lane composition so both lanes see the
/// same demand model.
fn propose_with_fit(
    inputs: &PolicyInputs<'_>,
    settings: &Settings,
    calendar: &Calendar,
    fit: &FitOutcome,
) -> CoreResult<Proposal> {
    let window = calendar.protection_window(inputs.order_date, inputs.lane)?;
    let p_days = window.days;

    // Demand over the protection window, with uplifts.
    let promo_factor = promo_uplift_factor(inputs, settings);
    let event_factor = event_uplift_factor(window.r1, settings);
    let (mu_base, mut mu_p) =
        window_demand(&fit.model, &window, promo_factor, &inputs.planned_promos);
    if let Some(f) = event_factor {
        mu_p *= f;
    }

    // Right after a promo ends the level still carries its tail; damp the
    // window demand unless another promo overlaps it.
    let post_promo_damping = {
        let guardrail = &settings.post_promo_guardrail;
        if guardrail.enabled {
            let cutoff = inputs.order_date - Duration::days(guardrail.cooldown_days.max(0));
            let recent_promo = inputs
                .sales
                .iter()
                .any(|s| s.promo && s.date >= cutoff && s.date <= inputs.order_date);
            let promo_ahead = inputs
                .planned_promos
                .iter()
                .any(|w| w.end >= window.r1 && w.start <= window.r2);
            (recent_promo && !promo_ahead)
                .then_some(guardrail.damping_factor.clamp(0.0, 1.0))
        } else {
            None
        }
    };
    if let Some(f) = post_promo_damping {
        mu_p *= f;
    }

    // Sigma from rolling residuals of the same model family.
    let observations: Vec<(NaiveDate, f64)> =
        inputs.sales.iter().map(|s| (s.date, s.qty)).collect();
    let refit_method = concrete_method(&fit.model);
    let icfg = settings.intermittent_forecast.clone();
    let residuals = uncertainty::one_step_residuals(
        &observations,
        inputs.censored,
        56,
        move |obs, cens| forecast::fit_model(obs, cens, refit_method, &icfg).model,
    );

    let csl = effective_csl(inputs.sku, settings);
    let z_alpha = uncertainty::z_for_csl(csl);

    let sigma_day = uncertainty::estimate_sigma_day(&residuals, SigmaEstimator::Mad);
    let (sigma_p, safety, safety_source) = match sigma_day {
        Some(sd) => {
            let sp = uncertainty::sigma_for_horizon(sd, p_days);
            (
                sp,
                uncertainty::safety_stock(z_alpha, sp),
                SafetySource::Residuals {
                    estimator: "mad".to_string(),
                    n_residuals: residuals.len(),
                },
            )
        }
        None => match fit.model.size_estimate() {
            Some(z_t) => {
                let sp = uncertainty::sigma_for_horizon(z_t, p_days);
                (
                    sp,
                    uncertainty::safety_stock(z_alpha, sp),
                    SafetySource::SizeFallback,
                )
            }
            None => (
                0.0,
                inputs.sku.safety_stock as f64,
                SafetySource::Configured,
            ),
        },
    };

    // Reorder target and projected position at arrival.
    let reorder_target = mu_p + safety;
    let pipeline_due: i64 = inputs
        .pipeline
        .iter()
        .filter(|o| o.receipt_date <= window.r1)
        .map(|o| o.qty)
        .sum();
    let inventory_position = inputs.on_hand + pipeline_due - inputs.unfulfilled;
    let q_raw = (reorder_target - inventory_position as f64).max(0.0);

    // Shelf-life penalty on the raw quantity.
    let (min_life, horizon, penalty_mode, penalty_factor, threshold) =
        resolve_shelf_life(inputs.sku, settings);
    let mut q = q_raw.ceil() as i64;
    let mut waste_risk = None;
    let mut penalty = None;
    let shelf_life_active = settings.shelf_life_policy.enabled
        && inputs.sku.is_perishable()
        && inputs.lot_book_trusted;
    if shelf_life_active {
        let lambda = if p_days > 0 { mu_p / p_days as f64 } else { 0.0 };
        let combined = shelf_life::with_incoming(
            inputs.lots,
            &inputs.sku.sku,
            q,
            window.r1,
            inputs.sku.shelf_life_days,
        );
        let risk = shelf_life::demand_adjusted_risk(
            &combined,
            inputs.order_date,
            lambda,
            min_life,
            horizon,
        );
        waste_risk = Some(risk);
        let outcome = shelf_life::apply_penalty(q, risk, penalty_mode, penalty_factor, threshold);
        q = outcome.qty_after;
        penalty = Some(outcome);
    }

    // Constraints re-applied after any penalty.
    let (qty, steps, cap_reason) = apply_constraints(q, inputs.sku, inventory_position);

    debug!(
        sku = %inputs.sku.sku,
        lane = inputs.lane.as_str(),
        qty,
        mu_p,
        sigma_p,
        "proposal computed"
    );

    let breakdown = Breakdown {
        sku: inputs.sku.sku.clone(),
        order_date: inputs.order_date,
        lane: inputs.lane,
        r1: window.r1,
        r2: window.r2,
        protection_days: p_days,
        method: fit.model.method_label().to_string(),
        mu_p_base: mu_base,
        promo_uplift_factor: promo_factor,
        event_uplift_factor: event_factor,
        post_promo_damping,
        mu_p,
        sigma_day,
        sigma_p,
        z_alpha,
        safety_stock: safety,
        safety_source,
        reorder_target,
        inventory_position,
        q_raw,
        n_censored: inputs.censoring.n_censored,
        censor_reasons: inputs
            .censoring
            .reasons
            .iter()
            .map(|(date, reason)| format!("{}: {}", date, reason))
            .collect(),
        waste_risk_percent: waste_risk,
        penalty,
        constraints: steps,
        cap_reason,
        qty,
    };

    Ok(Proposal {
        sku: inputs.sku.sku.clone(),
        lane: inputs.lane,
        order_date: inputs.order_date,
        receipt_date: window.r1,
        qty,
        breakdown,
    })
}

/// Compute one proposal, fitting the demand model from the supplied sales
/// history.
pub fn propose(
    inputs: &PolicyInputs<'_>,
    settings: &Settings,
    calendar: &Calendar,
) -> CoreResult<Proposal> {
    let observations: Vec<(NaiveDate, f64)> =
        inputs.sales.iter().map(|s| (s.date, s.qty)).collect();
    let fit = forecast::fit_model(
        &observations,
        inputs.censored,
        inputs.sku.forecast_method,
        &settings.intermittent_forecast,
    );
    propose_with_fit(inputs, settings, calendar, &fit)
}

/// Friday dual-lane composition: the Saturday proposal is computed first;
/// its quantity joins the pipeline as a virtual order arriving at the
/// Saturday receipt date before the Monday proposal is computed against
/// the same demand model.
pub fn friday_dual_proposals(
    inputs: &PolicyInputs<'_>,
    settings: &Settings,
    calendar: &Calendar,
) -> CoreResult<(Proposal, Proposal)> {
    let observations: Vec<(NaiveDate, f64)> =
        inputs.sales.iter().map(|s| (s.date, s.qty)).collect();
    let fit = forecast::fit_model(
        &observations,
        inputs.censored,
        inputs.sku.forecast_method,
        &settings.intermittent_forecast,
    );

    let mut saturday_inputs = inputs.clone();
    saturday_inputs.lane = Lane::Saturday;
    let saturday = propose_with_fit(&saturday_inputs, settings, calendar, &fit)?;

    let mut monday_inputs = inputs.clone();
    monday_inputs.lane = Lane::Monday;
    if saturday.qty > 0 {
        monday_inputs.pipeline.push(PipelineOrder {
            receipt_date: saturday.receipt_date,
            qty: saturday.qty,
        });
    }
    let monday = propose_with_fit(&monday_inputs, settings, calendar, &fit)?;

    Ok((saturday, monday))
}
