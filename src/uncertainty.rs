//! Uncertainty Estimation
//!
//! Daily demand sigma from rolling one-step-ahead forecast residuals,
//! using robust estimators so a single outlier week cannot inflate safety
//! stock. Horizon scaling assumes independent daily errors (σ_P = σ·√P);
//! autocorrelation is deliberately not modeled.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::forecast::Model;

/// Robust sigma estimator choice. MAD is the default (50% breakdown
/// point); winsorized trims `fraction` at both tails before a classical
/// standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigmaEstimator {
    Mad,
    Winsorized { fraction: f64 },
}

/// Minimum residual count below which sigma estimation defers to the
/// fallback chain.
pub const MIN_RESIDUALS: usize = 5;

/// Minimum training days before a one-step forecast is scored.
const MIN_TRAIN_DAYS: usize = 7;

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Rolling one-step-ahead residuals over the trailing `window_days`
/// observations. For each non-censored day `t`, the supplied `fit`
/// closure trains on everything before `t` and is scored on day `t`.
/// Censored days contribute neither training targets nor residuals.
pub fn one_step_residuals<F>(
    observations: &[(NaiveDate, f64)],
    censored: &[bool],
    window_days: usize,
    fit: F,
) -> Vec<f64>
where
    F: Fn(&[(NaiveDate, f64)], &[bool]) -> Model,
{
    let n = observations.len();
    let start = n.saturating_sub(window_days);
    let mut residuals = Vec::new();
    for t in start.max(MIN_TRAIN_DAYS)..n {
        if censored.get(t).copied().unwrap_or(false) {
            continue;
        }
        let model = fit(&observations[..t], &censored[..t.min(censored.len())]);
        let (date, actual) = observations[t];
        residuals.push(actual.max(0.0) - model.predict_single_day(date));
    }
    residuals
}

/// MAD-based sigma: `1.4826 · median(|r − median(r)|)`.
pub fn mad_sigma(residuals: &[f64]) -> Option<f64> {
    if residuals.len() < MIN_RESIDUALS {
        return None;
    }
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let med = median(&sorted);
    let mut deviations: Vec<f64> = residuals.iter().map(|r| (r - med).abs()).collect();
    deviations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(1.4826 * median(&deviations))
}

/// Winsorized sigma: clamp the extreme `fraction` at both tails to the
/// boundary values, then take the sample standard deviation.
pub fn winsorized_sigma(residuals: &[f64], fraction: f64) -> Option<f64> {
    let n = residuals.len();
    if n < MIN_RESIDUALS {
        return None;
    }
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let k = ((n as f64) * fraction.clamp(0.0, 0.45)).floor() as usize;
    let lo = sorted[k];
    let hi = sorted[n - 1 - k];
    let clamped: Vec<f64> = sorted.iter().map(|r| r.clamp(lo, hi)).collect();
    let mean = clamped.iter().sum::<f64>() / n as f64;
    let var = clamped.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    Some(var.sqrt())
}

/// Classical sample standard deviation, for comparison and KPI use.
pub fn classical_std(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    Some(var.sqrt())
}

/// Estimate daily sigma from residuals with the chosen estimator.
pub fn estimate_sigma_day(residuals: &[f64], estimator: SigmaEstimator) -> Option<f64> {
    match estimator {
        SigmaEstimator::Mad => mad_sigma(residuals),
        SigmaEstimator::Winsorized { fraction } => winsorized_sigma(residuals, fraction),
    }
}

/// Scale a daily sigma to a protection window of `p_days`.
pub fn sigma_for_horizon(sigma_day: f64, p_days: i64) -> f64 {
    sigma_day.max(0.0) * (p_days.max(0) as f64).sqrt()
}

/// Normal quantile for a target cycle service level. CSL is clamped into
/// the open unit interval; values at or below 0.5 yield z <= 0 and
/// therefore zero safety stock downstream.
pub fn z_for_csl(csl: f64) -> f64 {
    let p = csl.clamp(1e-6, 0.9999);
    match Normal::new(0.0, 1.0) {
        Ok(n) => n.inverse_cdf(p),
        Err(_) => 0.0,
    }
}

/// Safety stock for the window: `z_α · σ_P`, floored at zero.
pub fn safety_stock(z_alpha: f64, sigma_p: f64) -> f64 {
    (z_alpha * sigma_p).max(0.0)
}
