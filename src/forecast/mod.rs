//! Demand Forecasting
//!
//! Two model families behind one `Model` enum: the level × day-of-week
//! simple model for regular movers, and Croston/SBA/TSB for intermittent
//! demand. Method resolution honors the per-SKU setting, classification
//! and the backtest selector. Every prediction is non-negative.

pub mod censoring;
pub mod intermittent;
pub mod select;
pub mod simple;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::ForecastMethod;
use crate::settings::IntermittentForecastSettings;
use intermittent::{
    classify, fit_croston, fit_tsb, DemandClassification, IntermittentMethod, IntermittentModel,
};
use select::{select_method, Candidate, Metric, SelectionOutcome};
use simple::SimpleModel;

/// A fitted demand model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Model {
    Simple(SimpleModel),
    Intermittent(IntermittentModel),
}

impl Model {
    /// One-day forecast; never negative regardless of model state.
    pub fn predict_single_day(&self, date: NaiveDate) -> f64 {
        let value = match self {
            Model::Simple(m) => m.predict_single_day(date),
            Model::Intermittent(m) => m.daily_rate(),
        };
        value.max(0.0)
    }

    /// Lazy sequence of `horizon` daily forecasts starting at `start`.
    pub fn predict(&self, start: NaiveDate, horizon: usize) -> impl Iterator<Item = f64> + '_ {
        (0..horizon).map(move |i| self.predict_single_day(start + Duration::days(i as i64)))
    }

    /// Sum of daily forecasts over the window, the policy's `μ_P`.
    pub fn demand_over(&self, start: NaiveDate, horizon_days: i64) -> f64 {
        self.predict(start, horizon_days.max(0) as usize).sum()
    }

    pub fn method_label(&self) -> &'static str {
        match self {
            Model::Simple(_) => "simple",
            Model::Intermittent(m) => m.method.as_str(),
        }
    }

    /// Latest size estimate, used as a sigma fallback for slow movers.
    pub fn size_estimate(&self) -> Option<f64> {
        match self {
            Model::Simple(_) => None,
            Model::Intermittent(m) => {
                let z = m.size_estimate();
                (z > 0.0).then_some(z)
            }
        }
    }
}

/// Everything the fit decided, for the proposal breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub model: Model,
    pub method_requested: ForecastMethod,
    pub classification: Option<DemandClassification>,
    pub selection: Option<SelectionOutcome>,
}

fn series_of(observations: &[(NaiveDate, f64)]) -> Vec<f64> {
    observations.iter().map(|(_, y)| *y).collect()
}

fn fit_intermittent_by(
    method: IntermittentMethod,
    observations: &[(NaiveDate, f64)],
    censored: &[bool],
    alpha: f64,
) -> Model {
    let series = series_of(observations);
    let model = match method {
        IntermittentMethod::Croston | IntermittentMethod::Sba => {
            fit_croston(&series, censored, alpha, method)
        }
        IntermittentMethod::Tsb => fit_tsb(&series, censored, alpha),
    };
    Model::Intermittent(model)
}

/// Fit a demand model for one SKU.
///
/// `method` is the per-SKU selection; `Unset` defers to the settings
/// default. `monte_carlo` is accepted for compatibility and resolves to
/// the simple model. Auto mode classifies first, backtests the
/// intermittent candidates when the series qualifies, and falls back to
/// the simple model when configured.
pub fn fit_model(
    observations: &[(NaiveDate, f64)],
    censored: &[bool],
    method: ForecastMethod,
    cfg: &IntermittentForecastSettings,
) -> FitOutcome {
    let effective = match method {
        ForecastMethod::Unset => cfg.default_method,
        other => other,
    };
    // The settings default may itself be unset; that means simple. Auto
    // mode needs the intermittent machinery enabled.
    let effective = match effective {
        ForecastMethod::Unset | ForecastMethod::MonteCarlo => ForecastMethod::Simple,
        ForecastMethod::IntermittentAuto if !cfg.enabled => ForecastMethod::Simple,
        other => other,
    };

    match effective {
        ForecastMethod::Simple => FitOutcome {
            model: Model::Simple(simple::fit(
                observations,
                censored,
                cfg.alpha,
                cfg.alpha_boost,
            )),
            method_requested: method,
            classification: None,
            selection: None,
        },
        ForecastMethod::Croston => FitOutcome {
            model: fit_intermittent_by(IntermittentMethod::Croston, observations, censored, cfg.alpha),
            method_requested: method,
            classification: None,
            selection: None,
        },
        ForecastMethod::Sba => FitOutcome {
            model: fit_intermittent_by(IntermittentMethod::Sba, observations, censored, cfg.alpha),
            method_requested: method,
            classification: None,
            selection: None,
        },
        ForecastMethod::Tsb => FitOutcome {
            model: fit_intermittent_by(IntermittentMethod::Tsb, observations, censored, cfg.alpha),
            method_requested: method,
            classification: None,
            selection: None,
        },
        ForecastMethod::IntermittentAuto => {
            let series = series_of(observations);
            let classification = classify(&series, censored, cfg.adi_threshold, cfg.cv2_threshold);

            if !classification.is_intermittent && cfg.fallback_to_simple {
                debug!(
                    adi = classification.adi,
                    cv2 = classification.cv2,
                    "series not intermittent; falling back to simple model"
                );
                return FitOutcome {
                    model: Model::Simple(simple::fit(
                        observations,
                        censored,
                        cfg.alpha,
                        cfg.alpha_boost,
                    )),
                    method_requested: method,
                    classification: Some(classification),
                    selection: None,
                };
            }

            let selection = select_method(
                observations,
                censored,
                &[Candidate::Croston, Candidate::Sba, Candidate::Tsb],
                cfg.backtest_folds.max(0) as usize,
                cfg.backtest_min_history.max(0) as usize,
                Metric::from_name(&cfg.backtest_metric),
                cfg.alpha,
                cfg.alpha_boost,
                cfg.obsolescence_window_days.max(0) as usize,
            );

            let chosen = selection
                .as_ref()
                .map(|s| s.chosen)
                // Too little history to backtest: SBA is the
                // bias-corrected default for intermittent series.
                .unwrap_or(Candidate::Sba);

            let model = match chosen {
                Candidate::Simple => Model::Simple(simple::fit(
                    observations,
                    censored,
                    cfg.alpha,
                    cfg.alpha_boost,
                )),
                Candidate::Croston => {
                    fit_intermittent_by(IntermittentMethod::Croston, observations, censored, cfg.alpha)
                }
                Candidate::Sba => {
                    fit_intermittent_by(IntermittentMethod::Sba, observations, censored, cfg.alpha)
                }
                Candidate::Tsb => {
                    fit_intermittent_by(IntermittentMethod::Tsb, observations, censored, cfg.alpha)
                }
            };

            FitOutcome {
                model,
                method_requested: method,
                classification: Some(classification),
                selection,
            }
        }
        // Handled by the normalization above.
        ForecastMethod::Unset | ForecastMethod::MonteCarlo => unreachable!(),
    }
}
