//! Forecast Method Auto-Selection
//!
//! Rolling-origin backtest over candidate methods, scored by WMAPE or
//! absolute signed bias, with an obsolescence heuristic that prefers TSB
//! when recent demand is drying up.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::intermittent::{fit_croston, fit_tsb, IntermittentMethod};
use super::simple;

/// Candidate evaluated by the backtest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Candidate {
    Simple,
    Croston,
    Sba,
    Tsb,
}

impl Candidate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Candidate::Simple => "simple",
            Candidate::Croston => "croston",
            Candidate::Sba => "sba",
            Candidate::Tsb => "tsb",
        }
    }
}

/// Selection metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Wmape,
    Bias,
}

impl Metric {
    pub fn from_name(name: &str) -> Self {
        match name {
            "bias" => Metric::Bias,
            _ => Metric::Wmape,
        }
    }
}

/// Why and what the selector chose; carried into the breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub chosen: Candidate,
    pub scores: Vec<(Candidate, f64)>,
    pub folds_used: usize,
    pub obsolescence_preferred_tsb: bool,
}

/// Weighted MAPE: `Σ|a-f| / Σa`. None when actuals sum to zero.
pub fn wmape(actual: &[f64], forecast: &[f64]) -> Option<f64> {
    let denom: f64 = actual.iter().sum();
    if denom <= f64::EPSILON {
        return None;
    }
    let num: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| (a - f).abs())
        .sum();
    Some(num / denom)
}

/// Signed bias: `Σ(f-a) / Σa`. Positive means over-forecasting.
pub fn signed_bias(actual: &[f64], forecast: &[f64]) -> Option<f64> {
    let denom: f64 = actual.iter().sum();
    if denom <= f64::EPSILON {
        return None;
    }
    let num: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| (f - a))
        .sum();
    Some(num / denom)
}

/// Declining-size trend over the last `2 * window` kept days: the recent
/// half's mean demand fell below the prior half's.
pub fn declining_trend(series: &[f64], censored: &[bool], window: usize) -> bool {
    let kept: Vec<f64> = series
        .iter()
        .enumerate()
        .filter(|(i, _)| !censored.get(*i).copied().unwrap_or(false))
        .map(|(_, y)| y.max(0.0))
        .collect();
    if window == 0 || kept.len() < 2 * window {
        return false;
    }
    let recent = &kept[kept.len() - window..];
    let prior = &kept[kept.len() - 2 * window..kept.len() - window];
    let recent_mean = recent.iter().sum::<f64>() / window as f64;
    let prior_mean = prior.iter().sum::<f64>() / window as f64;
    prior_mean > f64::EPSILON && recent_mean < prior_mean
}

fn forecast_with(
    candidate: Candidate,
    train_obs: &[(NaiveDate, f64)],
    train_censored: &[bool],
    test_dates: &[NaiveDate],
    alpha: f64,
    alpha_boost: f64,
) -> Vec<f64> {
    match candidate {
        Candidate::Simple => {
            let model = simple::fit(train_obs, train_censored, alpha, alpha_boost);
            test_dates
                .iter()
                .map(|date| model.predict_single_day(*date))
                .collect()
        }
        Candidate::Croston | Candidate::Sba => {
            let series: Vec<f64> = train_obs.iter().map(|(_, y)| *y).collect();
            let method = if candidate == Candidate::Croston {
                IntermittentMethod::Croston
            } else {
                IntermittentMethod::Sba
            };
            let model = fit_croston(&series, train_censored, alpha, method);
            vec![model.daily_rate(); test_dates.len()]
        }
        Candidate::Tsb => {
            let series: Vec<f64> = train_obs.iter().map(|(_, y)| *y).collect();
            let model = fit_tsb(&series, train_censored, alpha);
            vec![model.daily_rate(); test_dates.len()]
        }
    }
}

/// Rolling-origin backtest: K folds of one week each at the end of the
/// history. Each candidate is refit per fold on the data before the
/// origin and scored on the non-censored test days; overall score is the
/// pooled metric. Returns None when history is too short to run a single
/// fold.
#[allow(clippy::too_many_arguments)]
pub fn select_method(
    observations: &[(NaiveDate, f64)],
    censored: &[bool],
    candidates: &[Candidate],
    folds: usize,
    min_history: usize,
    metric: Metric,
    alpha: f64,
    alpha_boost: f64,
    obsolescence_window: usize,
) -> Option<SelectionOutcome> {
    const FOLD_HORIZON: usize = 7;
    let n = observations.len();
    if candidates.is_empty() || n < min_history || folds == 0 {
        return None;
    }
    let max_folds = (n.saturating_sub(FOLD_HORIZON)) / FOLD_HORIZON;
    let folds_used = folds.min(max_folds);
    if folds_used == 0 {
        return None;
    }

    let series: Vec<f64> = observations.iter().map(|(_, y)| *y).collect();

    let mut scores = Vec::new();
    for candidate in candidates {
        // Pool errors across folds before computing the metric.
        let mut pooled_actual = Vec::new();
        let mut pooled_forecast = Vec::new();
        for k in 0..folds_used {
            let origin = n - (folds_used - k) * FOLD_HORIZON;
            let test_end = (origin + FOLD_HORIZON).min(n);
            let train_obs = &observations[..origin];
            let train_censored = &censored[..origin.min(censored.len())];
            let test_dates: Vec<NaiveDate> = observations[origin..test_end]
                .iter()
                .map(|(d, _)| *d)
                .collect();
            let predicted = forecast_with(
                *candidate,
                train_obs,
                train_censored,
                &test_dates,
                alpha,
                alpha_boost,
            );
            for (offset, idx) in (origin..test_end).enumerate() {
                if censored.get(idx).copied().unwrap_or(false) {
                    continue;
                }
                pooled_actual.push(series[idx].max(0.0));
                pooled_forecast.push(predicted[offset]);
            }
        }
        let score = match metric {
            Metric::Wmape => wmape(&pooled_actual, &pooled_forecast),
            Metric::Bias => signed_bias(&pooled_actual, &pooled_forecast).map(f64::abs),
        };
        // A candidate with no scorable days loses to any scorable one.
        scores.push((*candidate, score.unwrap_or(f64::INFINITY)));
    }

    let obsolescence = declining_trend(&series, censored, obsolescence_window)
        && candidates.contains(&Candidate::Tsb);
    let chosen = if obsolescence {
        Candidate::Tsb
    } else {
        // Ties go to the earliest candidate so selection stays stable.
        let mut best: Option<(Candidate, f64)> = None;
        for (candidate, score) in &scores {
            if best.map_or(true, |(_, s)| *score < s) {
                best = Some((*candidate, *score));
            }
        }
        best.map(|(c, _)| c)?
    };

    Some(SelectionOutcome {
        chosen,
        scores,
        folds_used,
        obsolescence_preferred_tsb: obsolescence,
    })
}
