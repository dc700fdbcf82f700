//! Intermittent Demand Models
//!
//! Croston, SBA and TSB for slow movers, plus the ADI/CV² classifier that
//! decides whether a series is intermittent at all. All fits skip censored
//! indices: a stock-out day is not a zero-demand day.

use serde::{Deserialize, Serialize};

/// Which estimator produced a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntermittentMethod {
    Croston,
    Sba,
    Tsb,
}

impl IntermittentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntermittentMethod::Croston => "croston",
            IntermittentMethod::Sba => "sba",
            IntermittentMethod::Tsb => "tsb",
        }
    }
}

/// ADI / CV² classification of a demand series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandClassification {
    pub adi: f64,
    pub cv2: f64,
    pub n_days: usize,
    pub n_nonzero: usize,
    pub is_intermittent: bool,
}

/// Classify the non-censored part of a series. `ADI = n_days / n_nonzero`,
/// `CV²` over non-zero sizes; intermittent iff both exceed their
/// thresholds. Fewer than two non-zero observations never classify as
/// intermittent (nothing to fit).
pub fn classify(
    series: &[f64],
    censored: &[bool],
    adi_threshold: f64,
    cv2_threshold: f64,
) -> DemandClassification {
    let kept: Vec<f64> = series
        .iter()
        .enumerate()
        .filter(|(i, _)| !censored.get(*i).copied().unwrap_or(false))
        .map(|(_, y)| y.max(0.0))
        .collect();
    let n_days = kept.len();
    let nonzero: Vec<f64> = kept.iter().copied().filter(|y| *y > 0.0).collect();
    let n_nonzero = nonzero.len();

    if n_nonzero < 2 {
        return DemandClassification {
            adi: 0.0,
            cv2: 0.0,
            n_days,
            n_nonzero,
            is_intermittent: false,
        };
    }

    let adi = n_days as f64 / n_nonzero as f64;
    let mean = nonzero.iter().sum::<f64>() / n_nonzero as f64;
    let var = nonzero.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / n_nonzero as f64;
    let cv2 = if mean > f64::EPSILON { var / (mean * mean) } else { 0.0 };

    DemandClassification {
        adi,
        cv2,
        n_days,
        n_nonzero,
        is_intermittent: adi > adi_threshold && cv2 > cv2_threshold,
    }
}

/// A fitted intermittent model. `z` is the smoothed non-zero size, `p` the
/// smoothed inter-demand interval (Croston/SBA), `b` the smoothed demand
/// probability (TSB).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermittentModel {
    pub method: IntermittentMethod,
    pub alpha: f64,
    pub z: f64,
    pub p: f64,
    pub b: f64,
    pub n_nonzero: usize,
}

impl IntermittentModel {
    /// Flat daily forecast rate; never negative.
    pub fn daily_rate(&self) -> f64 {
        let rate = match self.method {
            IntermittentMethod::Croston => {
                if self.p > f64::EPSILON {
                    self.z / self.p
                } else {
                    0.0
                }
            }
            IntermittentMethod::Sba => {
                if self.p > f64::EPSILON {
                    (1.0 - self.alpha / 2.0) * self.z / self.p
                } else {
                    0.0
                }
            }
            IntermittentMethod::Tsb => self.b * self.z,
        };
        rate.max(0.0)
    }

    /// Latest smoothed demand size, used as a sigma fallback upstream.
    pub fn size_estimate(&self) -> f64 {
        self.z.max(0.0)
    }
}

fn kept_series(series: &[f64], censored: &[bool]) -> Vec<f64> {
    series
        .iter()
        .enumerate()
        .filter(|(i, _)| !censored.get(*i).copied().unwrap_or(false))
        .map(|(_, y)| y.max(0.0))
        .collect()
}

/// Croston / SBA fit: smooth size and interval on demand occurrences.
/// The interval counter runs over kept (non-censored) days only.
pub fn fit_croston(
    series: &[f64],
    censored: &[bool],
    alpha: f64,
    method: IntermittentMethod,
) -> IntermittentModel {
    debug_assert!(matches!(
        method,
        IntermittentMethod::Croston | IntermittentMethod::Sba
    ));
    let kept = kept_series(series, censored);
    let alpha = alpha.clamp(0.01, 0.99);

    let mut z: Option<f64> = None;
    let mut p: Option<f64> = None;
    let mut periods_since_demand = 0_f64;
    let mut n_nonzero = 0usize;

    for y in &kept {
        periods_since_demand += 1.0;
        if *y > 0.0 {
            n_nonzero += 1;
            z = Some(match z {
                None => *y,
                Some(prev) => alpha * *y + (1.0 - alpha) * prev,
            });
            p = Some(match p {
                None => periods_since_demand,
                Some(prev) => alpha * periods_since_demand + (1.0 - alpha) * prev,
            });
            periods_since_demand = 0.0;
        }
    }

    IntermittentModel {
        method,
        alpha,
        z: z.unwrap_or(0.0),
        p: p.unwrap_or(1.0),
        b: 0.0,
        n_nonzero,
    }
}

/// TSB fit: size smoothed on demand days, probability smoothed every day
/// so it decays through demand droughts.
pub fn fit_tsb(series: &[f64], censored: &[bool], alpha: f64) -> IntermittentModel {
    let kept = kept_series(series, censored);
    let alpha = alpha.clamp(0.01, 0.99);

    let mut z: Option<f64> = None;
    let mut b: Option<f64> = None;
    let mut n_nonzero = 0usize;

    for y in &kept {
        let demand = *y > 0.0;
        let indicator = if demand { 1.0 } else { 0.0 };
        b = Some(match b {
            None => indicator,
            Some(prev) => alpha * indicator + (1.0 - alpha) * prev,
        });
        if demand {
            n_nonzero += 1;
            z = Some(match z {
                None => *y,
                Some(prev) => alpha * *y + (1.0 - alpha) * prev,
            });
        }
    }

    IntermittentModel {
        method: IntermittentMethod::Tsb,
        alpha,
        z: z.unwrap_or(0.0),
        p: 1.0,
        b: b.unwrap_or(0.0),
        n_nonzero,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_intermittent_series() {
        // 60 days, 18 non-zero, highly variable sizes.
        let mut series = vec![0.0; 60];
        let sizes = [
            4.0, 1.0, 9.0, 2.0, 12.0, 1.0, 6.0, 15.0, 2.0, 1.0, 8.0, 20.0, 3.0, 1.0, 10.0, 2.0,
            14.0, 5.0,
        ];
        for (k, size) in sizes.iter().enumerate() {
            series[k * 3] = *size;
        }
        let c = classify(&series, &vec![false; 60], 1.32, 0.49);
        assert_eq!(c.n_nonzero, 18);
        assert!((c.adi - 60.0 / 18.0).abs() < 1e-9);
        assert!(c.adi > 1.32);
        assert!(c.cv2 > 0.49, "cv2 = {}", c.cv2);
        assert!(c.is_intermittent);
    }

    #[test]
    fn test_classification_smooth_series() {
        let series = vec![10.0; 30];
        let c = classify(&series, &vec![false; 30], 1.32, 0.49);
        assert!((c.adi - 1.0).abs() < 1e-9);
        assert!(!c.is_intermittent);
    }

    #[test]
    fn test_classification_ignores_censored() {
        // Censored zeros must not inflate ADI.
        let series = vec![5.0, 0.0, 0.0, 5.0, 0.0, 5.0];
        let censored = vec![false, true, true, false, false, false];
        let c = classify(&series, &censored, 1.32, 0.49);
        assert_eq!(c.n_days, 4);
        assert_eq!(c.n_nonzero, 3);
    }

    #[test]
    fn test_croston_steady_pattern() {
        // Demand of 6 every third day: z -> 6, p -> 3, rate -> 2.
        let mut series = vec![0.0; 30];
        for k in (2..30).step_by(3) {
            series[k] = 6.0;
        }
        let model = fit_croston(&series, &vec![false; 30], 0.1, IntermittentMethod::Croston);
        assert!((model.z - 6.0).abs() < 1e-9);
        assert!((model.p - 3.0).abs() < 0.2);
        assert!((model.daily_rate() - 2.0).abs() < 0.2);
    }

    #[test]
    fn test_sba_shrinks_croston() {
        let mut series = vec![0.0; 30];
        for k in (2..30).step_by(3) {
            series[k] = 6.0;
        }
        let croston = fit_croston(&series, &vec![false; 30], 0.2, IntermittentMethod::Croston);
        let sba = fit_croston(&series, &vec![false; 30], 0.2, IntermittentMethod::Sba);
        assert!((sba.daily_rate() - 0.9 * croston.daily_rate()).abs() < 1e-9);
    }

    #[test]
    fn test_tsb_decays_without_demand() {
        let mut series = vec![0.0; 40];
        series[0] = 8.0;
        series[3] = 8.0;
        series[6] = 8.0;
        // Nothing after day 6: probability decays every day.
        let model = fit_tsb(&series, &vec![false; 40], 0.15);
        let early = fit_tsb(&series[..8], &vec![false; 8], 0.15);
        assert!(model.daily_rate() < early.daily_rate());
        assert!(model.daily_rate() >= 0.0);
    }

    #[test]
    fn test_all_zero_series() {
        let series = vec![0.0; 20];
        let croston = fit_croston(&series, &vec![false; 20], 0.1, IntermittentMethod::Croston);
        assert_eq!(croston.daily_rate(), 0.0);
        let tsb = fit_tsb(&series, &vec![false; 20], 0.1);
        assert_eq!(tsb.daily_rate(), 0.0);
    }

    #[test]
    fn test_censored_days_not_counted_in_intervals() {
        // With censored gaps removed, the pattern is demand every other
        // kept day.
        let series = vec![4.0, 0.0, 0.0, 0.0, 4.0, 0.0, 4.0];
        let censored = vec![false, true, true, false, false, false, false];
        let model = fit_croston(&series, &censored, 0.1, IntermittentMethod::Croston);
        assert!(model.p < 2.5, "p = {}", model.p);
    }
}
