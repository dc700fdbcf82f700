//! Settings Container
//!
//! A single JSON document persisted in the settings table. Typed sections
//! cover what the core consumes; unknown sections round-trip untouched so
//! external tools can park their own configuration here. Missing keys merge
//! to defaults on read, so a freshly created database needs no seed
//! document.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::CoreResult;
use crate::models::{ForecastMethod, WastePenaltyMode};

/// Engine-wide defaults applied when a SKU leaves a parameter unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderEngineSettings {
    pub default_moq: i64,
    pub default_pack_size: i64,
    pub default_lead_time_days: i64,
    pub default_review_period_days: i64,
    pub default_max_stock: i64,
    /// Lookback for UNFULFILLED events when flagging censored days.
    pub censoring_lookback_days: i64,
}

impl Default for ReorderEngineSettings {
    fn default() -> Self {
        Self {
            default_moq: 1,
            default_pack_size: 1,
            default_lead_time_days: 1,
            default_review_period_days: 0,
            default_max_stock: 0,
            censoring_lookback_days: 3,
        }
    }
}

/// Shelf-life policy knobs; per-SKU overrides win over these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShelfLifePolicySettings {
    pub enabled: bool,
    pub min_shelf_life_days: i64,
    pub waste_horizon_days: i64,
    pub penalty_mode: WastePenaltyMode,
    pub penalty_factor: f64,
    pub risk_threshold_percent: f64,
    /// Category name -> minimum residual life override.
    pub category_min_life: BTreeMap<String, i64>,
    /// Fraction of nominal shelf life actually observed on arrival.
    pub realization_factor: f64,
    /// Lot-vs-ledger divergence (units) that degrades to the conservative
    /// fallback.
    pub reconcile_tolerance_units: i64,
}

impl Default for ShelfLifePolicySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_shelf_life_days: 0,
            waste_horizon_days: 21,
            penalty_mode: WastePenaltyMode::None,
            penalty_factor: 0.3,
            risk_threshold_percent: 20.0,
            category_min_life: BTreeMap::new(),
            realization_factor: 1.0,
            reconcile_tolerance_units: 1,
        }
    }
}

/// Target service levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLevelSettings {
    /// "csl" is the only metric this core computes; kept as text for
    /// compatibility with external editors.
    pub metric: String,
    pub default_csl: f64,
    /// Demand-class name -> CSL override.
    pub cluster_csl: BTreeMap<String, f64>,
}

impl Default for ServiceLevelSettings {
    fn default() -> Self {
        Self {
            metric: "csl".to_string(),
            default_csl: 0.95,
            cluster_csl: BTreeMap::new(),
        }
    }
}

/// Intermittent-demand forecasting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntermittentForecastSettings {
    pub enabled: bool,
    pub adi_threshold: f64,
    pub cv2_threshold: f64,
    pub alpha: f64,
    /// Extra smoothing applied when censored days are present in the fit.
    pub alpha_boost: f64,
    pub lookback_days: i64,
    pub backtest_min_history: i64,
    pub backtest_folds: i64,
    /// "wmape" or "bias".
    pub backtest_metric: String,
    pub default_method: ForecastMethod,
    pub fallback_to_simple: bool,
    pub obsolescence_window_days: i64,
}

impl Default for IntermittentForecastSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            adi_threshold: 1.32,
            cv2_threshold: 0.49,
            alpha: 0.1,
            alpha_boost: 0.15,
            lookback_days: 90,
            backtest_min_history: 28,
            backtest_folds: 4,
            backtest_metric: "wmape".to_string(),
            default_method: ForecastMethod::IntermittentAuto,
            fallback_to_simple: true,
            obsolescence_window_days: 14,
        }
    }
}

/// Valid order/delivery weekdays. Stored as ISO weekday numbers (Mon=1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    pub order_weekdays: Vec<u8>,
    pub delivery_weekdays: Vec<u8>,
    pub base_lead_time_days: i64,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            // Mon..Fri ordering, Mon..Sat delivery.
            order_weekdays: vec![1, 2, 3, 4, 5],
            delivery_weekdays: vec![1, 2, 3, 4, 5, 6],
            base_lead_time_days: 1,
        }
    }
}

impl CalendarSettings {
    pub fn order_days(&self) -> Vec<Weekday> {
        self.order_weekdays
            .iter()
            .filter_map(|n| iso_weekday(*n))
            .collect()
    }

    pub fn delivery_days(&self) -> Vec<Weekday> {
        self.delivery_weekdays
            .iter()
            .filter_map(|n| iso_weekday(*n))
            .collect()
    }
}

fn iso_weekday(n: u8) -> Option<Weekday> {
    match n {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Guardrail damping the forecast right after a promo ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostPromoGuardrailSettings {
    pub enabled: bool,
    pub cooldown_days: i64,
    pub damping_factor: f64,
}

impl Default for PostPromoGuardrailSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_days: 3,
            damping_factor: 0.85,
        }
    }
}

/// Promo uplift estimation bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromoUpliftSettings {
    pub enabled: bool,
    pub max_factor: f64,
    pub min_promo_days: i64,
    /// Tail fraction trimmed on each side before the promo/non-promo ratio.
    pub winsor_fraction: f64,
}

impl Default for PromoUpliftSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_factor: 3.0,
            min_promo_days: 3,
            winsor_fraction: 0.1,
        }
    }
}

/// One event-uplift rule: a dated multiplier on expected demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventUpliftRule {
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub factor: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventUpliftSettings {
    pub enabled: bool,
    pub max_factor: f64,
    pub rules: Vec<EventUpliftRule>,
}

/// Pre-build of promo stock ahead of the event window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromoPrebuildSettings {
    pub enabled: bool,
    pub prebuild_days: i64,
}

impl Default for PromoPrebuildSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            prebuild_days: 2,
        }
    }
}

/// Closed-loop learning hooks; carried for compatibility with external
/// tooling that tunes parameters from KPI snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosedLoopSettings {
    pub enabled: bool,
    pub kpi_lookback_days: i64,
}

impl Default for ClosedLoopSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            kpi_lookback_days: 28,
        }
    }
}

/// The whole settings document. `extra` preserves sections this core does
/// not interpret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub reorder_engine: ReorderEngineSettings,
    pub shelf_life_policy: ShelfLifePolicySettings,
    pub service_level: ServiceLevelSettings,
    pub intermittent_forecast: IntermittentForecastSettings,
    pub calendar: CalendarSettings,
    pub post_promo_guardrail: PostPromoGuardrailSettings,
    pub promo_uplift: PromoUpliftSettings,
    pub event_uplift: EventUpliftSettings,
    pub promo_prebuild: PromoPrebuildSettings,
    pub closed_loop: ClosedLoopSettings,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Settings {
    /// Parse a stored JSON document, merging missing keys to defaults.
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Effective CSL for a demand class, falling back to the default.
    pub fn csl_for_class(&self, class: &str) -> f64 {
        self.service_level
            .cluster_csl
            .get(class)
            .copied()
            .unwrap_or(self.service_level.default_csl)
    }
}
