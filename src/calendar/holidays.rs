//! Holiday Rules
//!
//! Fixed yearly dates, single dates and Easter-relative offsets, each with
//! a scope (ordering, delivery or both). The calendar asks one question:
//! is this date closed for this scope?

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// What a holiday closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidayScope {
    Order,
    Delivery,
    Both,
}

impl HolidayScope {
    pub fn closes_order(&self) -> bool {
        matches!(self, HolidayScope::Order | HolidayScope::Both)
    }

    pub fn closes_delivery(&self) -> bool {
        matches!(self, HolidayScope::Delivery | HolidayScope::Both)
    }
}

/// One holiday rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HolidayRule {
    /// Recurs every year on the same month/day (e.g. 12-25).
    Fixed { month: u32, day: u32, scope: HolidayScope },
    /// A single calendar date.
    Single { date: NaiveDate, scope: HolidayScope },
    /// Offset in days from Easter Sunday of the date's year
    /// (0 = Easter Sunday, 1 = Easter Monday, -2 = Good Friday).
    EasterRelative { offset_days: i64, scope: HolidayScope },
}

impl HolidayRule {
    fn matches(&self, date: NaiveDate) -> Option<HolidayScope> {
        match self {
            HolidayRule::Fixed { month, day, scope } => {
                (date.month() == *month && date.day() == *day).then_some(*scope)
            }
            HolidayRule::Single { date: d, scope } => (date == *d).then_some(*scope),
            HolidayRule::EasterRelative { offset_days, scope } => {
                let easter = easter_sunday(date.year());
                (date == easter + chrono::Duration::days(*offset_days)).then_some(*scope)
            }
        }
    }
}

/// The full holiday configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HolidaySet {
    pub rules: Vec<HolidayRule>,
}

impl HolidaySet {
    pub fn new(rules: Vec<HolidayRule>) -> Self {
        Self { rules }
    }

    pub fn closed_for_order(&self, date: NaiveDate) -> bool {
        self.rules
            .iter()
            .filter_map(|r| r.matches(date))
            .any(|s| s.closes_order())
    }

    pub fn closed_for_delivery(&self, date: NaiveDate) -> bool {
        self.rules
            .iter()
            .filter_map(|r| r.matches(date))
            .any(|s| s.closes_delivery())
    }
}

/// Easter Sunday for a Gregorian year (anonymous Gauss algorithm).
pub fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 4, 1).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_easter_known_years() {
        assert_eq!(easter_sunday(2024), d(2024, 3, 31));
        assert_eq!(easter_sunday(2025), d(2025, 4, 20));
        assert_eq!(easter_sunday(2026), d(2026, 4, 5));
    }

    #[test]
    fn test_fixed_rule_recurs_yearly() {
        let set = HolidaySet::new(vec![HolidayRule::Fixed {
            month: 12,
            day: 25,
            scope: HolidayScope::Both,
        }]);
        assert!(set.closed_for_order(d(2025, 12, 25)));
        assert!(set.closed_for_delivery(d(2026, 12, 25)));
        assert!(!set.closed_for_order(d(2026, 12, 24)));
    }

    #[test]
    fn test_scope_separation() {
        let set = HolidaySet::new(vec![HolidayRule::Single {
            date: d(2026, 2, 9),
            scope: HolidayScope::Delivery,
        }]);
        assert!(set.closed_for_delivery(d(2026, 2, 9)));
        assert!(!set.closed_for_order(d(2026, 2, 9)));
    }

    #[test]
    fn test_easter_relative_rule() {
        // Easter Monday 2026 falls on April 6.
        let set = HolidaySet::new(vec![HolidayRule::EasterRelative {
            offset_days: 1,
            scope: HolidayScope::Both,
        }]);
        assert!(set.closed_for_delivery(d(2026, 4, 6)));
        assert!(!set.closed_for_delivery(d(2026, 4, 7)));
    }
}
