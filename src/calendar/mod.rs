//! Delivery Calendar
//!
//! Pure computation over order/delivery weekday sets, holiday skipping and
//! the Friday dual-lane rule. Produces receipt dates and protection-period
//! lengths for the replenishment policy. No clock access: every function is
//! deterministic in its arguments.

pub mod holidays;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::settings::CalendarSettings;
pub use holidays::{easter_sunday, HolidayRule, HolidayScope, HolidaySet};

/// Forward scans give up after this many days; a calendar that cannot
/// produce a date within a year is misconfigured.
const SCAN_LIMIT_DAYS: i64 = 370;

/// Ordering lane. `Saturday` and `Monday` exist only on Fridays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lane {
    Standard,
    Saturday,
    Monday,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Standard => "STANDARD",
            Lane::Saturday => "SATURDAY",
            Lane::Monday => "MONDAY",
        }
    }
}

/// Receipt window for one order: this order's arrival, the next order's
/// arrival, and the protection period in days between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionWindow {
    pub r1: NaiveDate,
    pub r2: NaiveDate,
    pub days: i64,
}

/// The delivery calendar: weekday sets, base lead time, holidays.
#[derive(Debug, Clone)]
pub struct Calendar {
    order_days: Vec<Weekday>,
    delivery_days: Vec<Weekday>,
    lead_time_days: i64,
    holidays: HolidaySet,
}

impl Calendar {
    pub fn new(
        order_days: Vec<Weekday>,
        delivery_days: Vec<Weekday>,
        lead_time_days: i64,
        holidays: HolidaySet,
    ) -> CoreResult<Self> {
        if order_days.is_empty() {
            return Err(CoreError::InvalidInput(
                "calendar needs at least one order weekday".into(),
            ));
        }
        if delivery_days.is_empty() {
            return Err(CoreError::InvalidInput(
                "calendar needs at least one delivery weekday".into(),
            ));
        }
        if lead_time_days < 0 {
            return Err(CoreError::InvalidInput(
                "lead time must be non-negative".into(),
            ));
        }
        Ok(Self {
            order_days,
            delivery_days,
            lead_time_days,
            holidays,
        })
    }

    pub fn from_settings(settings: &CalendarSettings, holidays: HolidaySet) -> CoreResult<Self> {
        Self::new(
            settings.order_days(),
            settings.delivery_days(),
            settings.base_lead_time_days,
            holidays,
        )
    }

    pub fn is_order_day(&self, date: NaiveDate) -> bool {
        self.order_days.contains(&date.weekday()) && !self.holidays.closed_for_order(date)
    }

    pub fn is_delivery_day(&self, date: NaiveDate) -> bool {
        self.delivery_days.contains(&date.weekday()) && !self.holidays.closed_for_delivery(date)
    }

    /// First valid order date strictly after `after`.
    pub fn next_order_date(&self, after: NaiveDate) -> CoreResult<NaiveDate> {
        let mut candidate = after + Duration::days(1);
        for _ in 0..SCAN_LIMIT_DAYS {
            if self.is_order_day(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::days(1);
        }
        Err(CoreError::InvalidInput(
            "no valid order date within a year".into(),
        ))
    }

    /// First valid delivery date for an order placed on `order_date` in the
    /// given lane.
    ///
    /// `Standard` walks forward from `order_date + lead_time`. `Saturday`
    /// targets the next Saturday and `Monday` the next Monday; both are
    /// Friday-only and fall forward to the next regular delivery day when
    /// the target is closed by a holiday.
    pub fn next_receipt_date(&self, order_date: NaiveDate, lane: Lane) -> CoreResult<NaiveDate> {
        match lane {
            Lane::Standard => {
                self.scan_delivery_day(order_date + Duration::days(self.lead_time_days))
            }
            Lane::Saturday | Lane::Monday => {
                if order_date.weekday() != Weekday::Fri {
                    return Err(CoreError::InvalidInput(format!(
                        "lane {} is only valid on Fridays, got {}",
                        lane.as_str(),
                        order_date.weekday()
                    )));
                }
                let target = if lane == Lane::Saturday {
                    order_date + Duration::days(1)
                } else {
                    order_date + Duration::days(3)
                };
                if self.holidays.closed_for_delivery(target) {
                    self.scan_delivery_day(target + Duration::days(1))
                } else {
                    Ok(target)
                }
            }
        }
    }

    fn scan_delivery_day(&self, from: NaiveDate) -> CoreResult<NaiveDate> {
        let mut candidate = from;
        for _ in 0..SCAN_LIMIT_DAYS {
            if self.is_delivery_day(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::days(1);
        }
        Err(CoreError::InvalidInput(
            "no valid delivery date within a year".into(),
        ))
    }

    /// Protection window for an order placed on `order_date` in `lane`:
    /// `r1` is this order's receipt date, `r2` the receipt date of the next
    /// order opportunity, advanced until it lands strictly after `r1`.
    pub fn protection_window(
        &self,
        order_date: NaiveDate,
        lane: Lane,
    ) -> CoreResult<ProtectionWindow> {
        let r1 = self.next_receipt_date(order_date, lane)?;
        let mut next_order = self.next_order_date(order_date)?;
        let mut r2 = self.next_receipt_date(next_order, Lane::Standard)?;
        let mut guard = 0;
        while r2 <= r1 {
            next_order = self.next_order_date(next_order)?;
            r2 = self.next_receipt_date(next_order, Lane::Standard)?;
            guard += 1;
            if guard > SCAN_LIMIT_DAYS {
                return Err(CoreError::InvalidInput(
                    "protection window does not close within a year".into(),
                ));
            }
        }
        Ok(ProtectionWindow {
            r1,
            r2,
            days: (r2 - r1).num_days(),
        })
    }
}
