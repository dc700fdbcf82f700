//! Simple Demand Model
//!
//! Exponentially smoothed level with day-of-week factors. Censored days
//! are skipped during the fit; their presence boosts the effective
//! smoothing constant so the level re-learns quickly once real
//! observations resume. Factor quality degrades gracefully with history
//! length.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Fitted level + day-of-week model. Factors are indexed by
/// `weekday.num_days_from_monday()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleModel {
    pub level: f64,
    pub dow_factors: [f64; 7],
    pub alpha_used: f64,
    pub n_observations: usize,
    pub n_censored: usize,
}

/// Fit over chronological `(date, qty)` observations; `censored[i]` skips
/// observation `i`. `alpha_boost` is added to `alpha` (capped at 0.99)
/// whenever at least one day was censored.
pub fn fit(
    observations: &[(NaiveDate, f64)],
    censored: &[bool],
    alpha: f64,
    alpha_boost: f64,
) -> SimpleModel {
    let any_censored = censored.iter().take(observations.len()).any(|c| *c);
    let alpha_eff = if any_censored {
        (alpha + alpha_boost).min(0.99)
    } else {
        alpha.min(0.99)
    };

    let mut level: Option<f64> = None;
    // Per-weekday running ratio sums.
    let mut ratio_sum = [0.0_f64; 7];
    let mut ratio_count = [0_usize; 7];
    let mut n_obs = 0usize;

    for (i, (date, qty)) in observations.iter().enumerate() {
        if censored.get(i).copied().unwrap_or(false) {
            continue;
        }
        n_obs += 1;
        let y = qty.max(0.0);
        let l = match level {
            None => y,
            Some(prev) => alpha_eff * y + (1.0 - alpha_eff) * prev,
        };
        level = Some(l);
        if l > f64::EPSILON {
            let dow = date.weekday().num_days_from_monday() as usize;
            ratio_sum[dow] += y / l;
            ratio_count[dow] += 1;
        }
    }

    let mut factors = [1.0_f64; 7];
    if n_obs >= 7 {
        for dow in 0..7 {
            if ratio_count[dow] > 0 {
                factors[dow] = ratio_sum[dow] / ratio_count[dow] as f64;
            }
        }
        if n_obs >= 14 {
            // Full factors: normalize so the weekly mean is exactly 1.
            let mean: f64 = factors.iter().sum::<f64>() / 7.0;
            if mean > f64::EPSILON {
                for f in factors.iter_mut() {
                    *f /= mean;
                }
            }
        }
    }

    let n_censored = censored
        .iter()
        .take(observations.len())
        .filter(|c| **c)
        .count();

    SimpleModel {
        level: level.unwrap_or(0.0),
        dow_factors: factors,
        alpha_used: alpha_eff,
        n_observations: n_obs,
        n_censored,
    }
}

impl SimpleModel {
    /// Forecast for one calendar day; never negative.
    pub fn predict_single_day(&self, date: NaiveDate) -> f64 {
        let dow = date.weekday().num_days_from_monday() as usize;
        (self.level * self.dow_factors[dow]).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn flat_series(start: NaiveDate, days: usize, qty: f64) -> Vec<(NaiveDate, f64)> {
        (0..days)
            .map(|i| (start + Duration::days(i as i64), qty))
            .collect()
    }

    #[test]
    fn test_flat_series_level() {
        let obs = flat_series(d(2026, 1, 5), 28, 10.0);
        let model = fit(&obs, &vec![false; 28], 0.2, 0.15);
        assert!((model.level - 10.0).abs() < 1e-9);
        for f in model.dow_factors {
            assert!((f - 1.0).abs() < 1e-9);
        }
        assert!((model.predict_single_day(d(2026, 2, 2)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_history_factors_fixed_to_one() {
        let obs = flat_series(d(2026, 1, 5), 5, 8.0);
        let model = fit(&obs, &vec![false; 5], 0.2, 0.15);
        assert_eq!(model.n_observations, 5);
        for f in model.dow_factors {
            assert_eq!(f, 1.0);
        }
    }

    #[test]
    fn test_partial_factors_between_7_and_13() {
        // 8 observations starting Monday: Mon/Tue appear twice, others
        // once; no normalization at this tier.
        let start = d(2026, 1, 5);
        assert_eq!(start.weekday(), chrono::Weekday::Mon);
        let mut obs = flat_series(start, 8, 10.0);
        // Double the Mondays.
        obs[0].1 = 20.0;
        obs[7].1 = 20.0;
        let model = fit(&obs, &vec![false; 8], 0.3, 0.15);
        let monday = model.dow_factors[0];
        let tuesday = model.dow_factors[1];
        assert!(monday > tuesday, "monday {} tuesday {}", monday, tuesday);
    }

    #[test]
    fn test_full_factors_normalized() {
        let start = d(2026, 1, 5);
        let obs: Vec<(NaiveDate, f64)> = (0..28)
            .map(|i| {
                let date = start + Duration::days(i);
                // Saturdays sell double.
                let qty = if date.weekday() == chrono::Weekday::Sat {
                    20.0
                } else {
                    10.0
                };
                (date, qty)
            })
            .collect();
        let model = fit(&obs, &vec![false; 28], 0.1, 0.15);
        let mean: f64 = model.dow_factors.iter().sum::<f64>() / 7.0;
        assert!((mean - 1.0).abs() < 1e-9);
        assert!(model.dow_factors[5] > model.dow_factors[0]);
    }

    #[test]
    fn test_censoring_boosts_alpha_and_skips_days() {
        let obs = flat_series(d(2026, 1, 5), 14, 10.0);
        let mut censored = vec![false; 14];
        censored[3] = true;
        censored[4] = true;
        let model = fit(&obs, &censored, 0.2, 0.15);
        assert!((model.alpha_used - 0.35).abs() < 1e-9);
        assert_eq!(model.n_observations, 12);
        assert_eq!(model.n_censored, 2);

        let plain = fit(&obs, &vec![false; 14], 0.2, 0.15);
        assert!((plain.alpha_used - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_boost_capped() {
        let obs = flat_series(d(2026, 1, 5), 7, 10.0);
        let mut censored = vec![false; 7];
        censored[0] = true;
        let model = fit(&obs, &censored, 0.95, 0.2);
        assert!((model.alpha_used - 0.99).abs() < 1e-9);
    }

    #[test]
    fn test_empty_history_zero_level() {
        let model = fit(&[], &[], 0.2, 0.15);
        assert_eq!(model.level, 0.0);
        assert_eq!(model.predict_single_day(d(2026, 2, 2)), 0.0);
    }

    #[test]
    fn test_prediction_never_negative() {
        let obs = vec![(d(2026, 1, 5), 0.0), (d(2026, 1, 6), 0.0)];
        let model = fit(&obs, &[false, false], 0.2, 0.15);
        assert!(model.predict_single_day(d(2026, 2, 2)) >= 0.0);
    }
}
