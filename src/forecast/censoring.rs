//! Demand Censoring
//!
//! Flags days whose observed sales cannot be read as demand: the shelf was
//! empty, or fulfillment failed nearby. Censored days are excluded from
//! forecast fitting and residual estimation so stock-outs do not teach the
//! policy that demand is low.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a day was censored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CensorReason {
    /// End-of-day stock was zero with no sales recorded.
    OutOfStock,
    /// An UNFULFILLED event fell inside the lookback window.
    UnfulfilledNearby,
}

impl fmt::Display for CensorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CensorReason::OutOfStock => write!(f, "out of stock with zero sales"),
            CensorReason::UnfulfilledNearby => write!(f, "unfulfilled delivery nearby"),
        }
    }
}

/// One observed day in the censoring input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayObservation {
    pub date: NaiveDate,
    pub qty_sold: i64,
    pub on_hand_eod: i64,
}

/// Per-day flags plus the summary carried into the policy breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CensoringSummary {
    pub n_censored: usize,
    pub reasons: Vec<(NaiveDate, CensorReason)>,
}

/// Flag each observation. Returns a vector aligned with `days`.
///
/// A day `d` is censored iff `on_hand_eod == 0 && qty_sold == 0`, or an
/// UNFULFILLED event exists in `[d - lookback, d]`.
pub fn flag_censored_days(
    days: &[DayObservation],
    unfulfilled_dates: &[NaiveDate],
    lookback_days: i64,
) -> Vec<Option<CensorReason>> {
    days.iter()
        .map(|obs| {
            if obs.on_hand_eod == 0 && obs.qty_sold == 0 {
                return Some(CensorReason::OutOfStock);
            }
            let near = unfulfilled_dates.iter().any(|u| {
                *u <= obs.date && (obs.date - *u).num_days() <= lookback_days.max(0)
            });
            if near {
                return Some(CensorReason::UnfulfilledNearby);
            }
            None
        })
        .collect()
}

/// Summarize flags for auditability.
pub fn summarize(days: &[DayObservation], flags: &[Option<CensorReason>]) -> CensoringSummary {
    let reasons: Vec<(NaiveDate, CensorReason)> = days
        .iter()
        .zip(flags.iter())
        .filter_map(|(obs, flag)| flag.map(|r| (obs.date, r)))
        .collect();
    CensoringSummary {
        n_censored: reasons.len(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn obs(date: NaiveDate, sold: i64, on_hand: i64) -> DayObservation {
        DayObservation {
            date,
            qty_sold: sold,
            on_hand_eod: on_hand,
        }
    }

    #[test]
    fn test_out_of_stock_zero_sales_is_censored() {
        let days = vec![obs(d(2026, 2, 1), 0, 0)];
        let flags = flag_censored_days(&days, &[], 3);
        assert_eq!(flags[0], Some(CensorReason::OutOfStock));
    }

    #[test]
    fn test_zero_sales_with_stock_is_observed() {
        let days = vec![obs(d(2026, 2, 1), 0, 12)];
        let flags = flag_censored_days(&days, &[], 3);
        assert_eq!(flags[0], None);
    }

    #[test]
    fn test_unfulfilled_lookback_window() {
        let days = vec![
            obs(d(2026, 2, 4), 5, 10),
            obs(d(2026, 2, 5), 5, 10),
            obs(d(2026, 2, 9), 5, 10),
        ];
        // UNFULFILLED on 02-05: covers 02-05..02-08 with L=3.
        let flags = flag_censored_days(&days, &[d(2026, 2, 5)], 3);
        assert_eq!(flags[0], None); // before the event
        assert_eq!(flags[1], Some(CensorReason::UnfulfilledNearby));
        assert_eq!(flags[2], None); // past the window
    }

    #[test]
    fn test_out_of_stock_takes_precedence() {
        let days = vec![obs(d(2026, 2, 5), 0, 0)];
        let flags = flag_censored_days(&days, &[d(2026, 2, 5)], 3);
        assert_eq!(flags[0], Some(CensorReason::OutOfStock));
    }

    #[test]
    fn test_summary_counts_match() {
        let days = vec![
            obs(d(2026, 2, 1), 0, 0),
            obs(d(2026, 2, 2), 4, 8),
            obs(d(2026, 2, 3), 0, 0),
        ];
        let flags = flag_censored_days(&days, &[], 3);
        let summary = summarize(&days, &flags);
        assert_eq!(summary.n_censored, 2);
        assert_eq!(summary.reasons.len(), 2);
        assert_eq!(summary.reasons[0].0, d(2026, 2, 1));
    }
}
