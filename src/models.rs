//! Shared Domain Model
//!
//! Entities and enumerations used across the ledger, lot book, policy and
//! workflow layers. Enumerations carry `as_str`/`parse_str` pairs because
//! they are persisted as text with CHECK constraints.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Ledger event kinds, in persistence spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Snapshot,
    Order,
    Receipt,
    Sale,
    Waste,
    Adjust,
    Unfulfilled,
    SkuEdit,
    AssortmentIn,
    AssortmentOut,
    ExportLog,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Snapshot => "SNAPSHOT",
            EventType::Order => "ORDER",
            EventType::Receipt => "RECEIPT",
            EventType::Sale => "SALE",
            EventType::Waste => "WASTE",
            EventType::Adjust => "ADJUST",
            EventType::Unfulfilled => "UNFULFILLED",
            EventType::SkuEdit => "SKU_EDIT",
            EventType::AssortmentIn => "ASSORTMENT_IN",
            EventType::AssortmentOut => "ASSORTMENT_OUT",
            EventType::ExportLog => "EXPORT_LOG",
        }
    }

    pub fn parse_str(s: &str) -> CoreResult<Self> {
        match s {
            "SNAPSHOT" => Ok(EventType::Snapshot),
            "ORDER" => Ok(EventType::Order),
            "RECEIPT" => Ok(EventType::Receipt),
            "SALE" => Ok(EventType::Sale),
            "WASTE" => Ok(EventType::Waste),
            "ADJUST" => Ok(EventType::Adjust),
            "UNFULFILLED" => Ok(EventType::Unfulfilled),
            "SKU_EDIT" => Ok(EventType::SkuEdit),
            "ASSORTMENT_IN" => Ok(EventType::AssortmentIn),
            "ASSORTMENT_OUT" => Ok(EventType::AssortmentOut),
            "EXPORT_LOG" => Ok(EventType::ExportLog),
            other => Err(CoreError::InvalidInput(format!(
                "unknown event type: {}",
                other
            ))),
        }
    }

    /// In-day application priority for the AsOf fold. Lower applies first.
    pub fn fold_priority(&self) -> u8 {
        match self {
            EventType::Snapshot => 0,
            EventType::Order | EventType::Receipt => 1,
            EventType::Sale | EventType::Waste => 2,
            EventType::Adjust => 3,
            EventType::Unfulfilled => 4,
            // Audit markers carry no stock impact; they sort last.
            EventType::SkuEdit
            | EventType::AssortmentIn
            | EventType::AssortmentOut
            | EventType::ExportLog => 5,
        }
    }

    /// Audit markers never touch stock fields.
    pub fn is_audit(&self) -> bool {
        self.fold_priority() == 5
    }
}

/// One append-only ledger row. `id` is the surrogate key assigned by the
/// database; rows built in memory before insertion carry `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub sku: String,
    pub event: EventType,
    pub qty: i64,
    pub receipt_date: Option<NaiveDate>,
    pub note: Option<String>,
}

impl Transaction {
    pub fn new(date: NaiveDate, sku: &str, event: EventType, qty: i64) -> Self {
        Self {
            id: None,
            date,
            sku: sku.to_string(),
            event,
            qty,
            receipt_date: None,
            note: None,
        }
    }

    pub fn with_receipt_date(mut self, receipt_date: NaiveDate) -> Self {
        self.receipt_date = Some(receipt_date);
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

/// Stock state reconstructed by the AsOf calculator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub on_hand: i64,
    pub on_order: i64,
    pub unfulfilled: i64,
}

/// Demand classification of a SKU, used to pick cluster service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandClass {
    Stable,
    Low,
    High,
    Seasonal,
}

impl DemandClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemandClass::Stable => "stable",
            DemandClass::Low => "low",
            DemandClass::High => "high",
            DemandClass::Seasonal => "seasonal",
        }
    }

    pub fn parse_str(s: &str) -> CoreResult<Self> {
        match s {
            "stable" => Ok(DemandClass::Stable),
            "low" => Ok(DemandClass::Low),
            "high" => Ok(DemandClass::High),
            "seasonal" => Ok(DemandClass::Seasonal),
            other => Err(CoreError::InvalidInput(format!(
                "unknown demand class: {}",
                other
            ))),
        }
    }
}

/// Per-SKU forecast method selection. `Unset` defers to settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Unset,
    Simple,
    MonteCarlo,
    Croston,
    Sba,
    Tsb,
    IntermittentAuto,
}

impl ForecastMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMethod::Unset => "unset",
            ForecastMethod::Simple => "simple",
            ForecastMethod::MonteCarlo => "monte_carlo",
            ForecastMethod::Croston => "croston",
            ForecastMethod::Sba => "sba",
            ForecastMethod::Tsb => "tsb",
            ForecastMethod::IntermittentAuto => "intermittent_auto",
        }
    }

    pub fn parse_str(s: &str) -> CoreResult<Self> {
        match s {
            "unset" | "" => Ok(ForecastMethod::Unset),
            "simple" => Ok(ForecastMethod::Simple),
            "monte_carlo" => Ok(ForecastMethod::MonteCarlo),
            "croston" => Ok(ForecastMethod::Croston),
            "sba" => Ok(ForecastMethod::Sba),
            "tsb" => Ok(ForecastMethod::Tsb),
            "intermittent_auto" => Ok(ForecastMethod::IntermittentAuto),
            other => Err(CoreError::InvalidInput(format!(
                "unknown forecast method: {}",
                other
            ))),
        }
    }
}

/// Shelf-life penalty mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WastePenaltyMode {
    None,
    Soft,
    Hard,
}

impl WastePenaltyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WastePenaltyMode::None => "none",
            WastePenaltyMode::Soft => "soft",
            WastePenaltyMode::Hard => "hard",
        }
    }

    pub fn parse_str(s: &str) -> CoreResult<Self> {
        match s {
            "none" | "" => Ok(WastePenaltyMode::None),
            "soft" => Ok(WastePenaltyMode::Soft),
            "hard" => Ok(WastePenaltyMode::Hard),
            other => Err(CoreError::InvalidInput(format!(
                "unknown waste penalty mode: {}",
                other
            ))),
        }
    }
}

/// SKU master record. Integer order parameters are validated on write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sku {
    pub sku: String,
    pub description: String,
    pub barcode: Option<String>,
    pub category: Option<String>,
    pub department: Option<String>,
    pub moq: i64,
    pub pack_size: i64,
    pub lead_time_days: i64,
    pub review_period_days: i64,
    pub safety_stock: i64,
    pub max_stock: i64,
    pub reorder_point: i64,
    pub shelf_life_days: i64,
    pub min_shelf_life_days: i64,
    pub waste_penalty_mode: WastePenaltyMode,
    pub waste_penalty_factor: f64,
    pub waste_risk_threshold: f64,
    pub demand_class: DemandClass,
    pub forecast_method: ForecastMethod,
    pub target_csl: f64,
    pub in_assortment: bool,
}

impl Sku {
    /// A minimal valid SKU with engine defaults; callers override fields.
    pub fn new(sku: &str, description: &str) -> Self {
        Self {
            sku: sku.to_string(),
            description: description.to_string(),
            barcode: None,
            category: None,
            department: None,
            moq: 1,
            pack_size: 1,
            lead_time_days: 1,
            review_period_days: 0,
            safety_stock: 0,
            max_stock: 0,
            reorder_point: 0,
            shelf_life_days: 0,
            min_shelf_life_days: 0,
            waste_penalty_mode: WastePenaltyMode::None,
            waste_penalty_factor: 0.0,
            waste_risk_threshold: 100.0,
            demand_class: DemandClass::Stable,
            forecast_method: ForecastMethod::Unset,
            target_csl: 0.95,
            in_assortment: true,
        }
    }

    pub fn is_perishable(&self) -> bool {
        self.shelf_life_days > 0
    }

    /// Range validation for numeric order parameters. Barcode problems are
    /// reported separately because they warn instead of failing.
    pub fn validate(&self) -> CoreResult<()> {
        if self.sku.trim().is_empty() {
            return Err(CoreError::InvalidInput("sku must not be empty".into()));
        }
        if self.moq < 1 {
            return Err(CoreError::InvalidInput("moq must be >= 1".into()));
        }
        if self.pack_size < 1 {
            return Err(CoreError::InvalidInput("pack_size must be >= 1".into()));
        }
        if !(0..=365).contains(&self.lead_time_days) {
            return Err(CoreError::InvalidInput(
                "lead_time_days must be in 0..=365".into(),
            ));
        }
        if self.review_period_days < 0
            || self.safety_stock < 0
            || self.max_stock < 0
            || self.reorder_point < 0
            || self.shelf_life_days < 0
            || self.min_shelf_life_days < 0
        {
            return Err(CoreError::InvalidInput(
                "order parameters must be non-negative".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.waste_penalty_factor) {
            return Err(CoreError::InvalidInput(
                "waste_penalty_factor must be in [0,1]".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.waste_risk_threshold) {
            return Err(CoreError::InvalidInput(
                "waste_risk_threshold must be in [0,100]".into(),
            ));
        }
        if !(0.0..=0.9999).contains(&self.target_csl) {
            return Err(CoreError::InvalidInput(
                "target_csl must be in [0, 0.9999]".into(),
            ));
        }
        Ok(())
    }

    /// EAN plausibility. Invalid barcodes warn upstream, never fail.
    pub fn barcode_warning(&self) -> Option<String> {
        let code = self.barcode.as_deref().unwrap_or("").trim();
        if code.is_empty() {
            return None;
        }
        let digits_only = code.chars().all(|c| c.is_ascii_digit());
        if !digits_only || !(12..=13).contains(&code.len()) {
            return Some(format!(
                "barcode '{}' for sku {} is not a 12-13 digit EAN",
                code, self.sku
            ));
        }
        None
    }
}

/// Order document status, a pure function of (ordered, received).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Partial,
    Received,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Received => "RECEIVED",
        }
    }

    pub fn parse_str(s: &str) -> CoreResult<Self> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PARTIAL" => Ok(OrderStatus::Partial),
            "RECEIVED" => Ok(OrderStatus::Received),
            other => Err(CoreError::InvalidInput(format!(
                "unknown order status: {}",
                other
            ))),
        }
    }

    /// Status is derived, never stored out of step with the quantities.
    pub fn derive(qty_ordered: i64, qty_received: i64) -> CoreResult<Self> {
        if qty_received < 0 || qty_received > qty_ordered {
            return Err(CoreError::ConstraintViolation(format!(
                "qty_received {} outside [0, {}]",
                qty_received, qty_ordered
            )));
        }
        Ok(if qty_received == 0 {
            OrderStatus::Pending
        } else if qty_received < qty_ordered {
            OrderStatus::Partial
        } else {
            OrderStatus::Received
        })
    }
}

/// One row of the order log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLog {
    pub order_id: String,
    pub sku: String,
    pub order_date: NaiveDate,
    pub receipt_date: NaiveDate,
    pub qty_ordered: i64,
    pub qty_received: i64,
    pub status: OrderStatus,
    /// Uplift metadata carried forward for traceability, JSON-shaped.
    pub uplift_meta: Option<String>,
}

/// One row of the receiving log. `document_id` is the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivingLog {
    pub document_id: String,
    pub date: NaiveDate,
    pub sku: String,
    pub qty_received: i64,
    pub receipt_date: NaiveDate,
}

/// A perishable lot. `lot_id` is the composite `receipt_ref|sku|expiry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub lot_id: String,
    pub sku: String,
    pub expiry_date: NaiveDate,
    pub qty_on_hand: i64,
    pub receipt_ref: Option<String>,
    pub receipt_date: Option<NaiveDate>,
}

impl Lot {
    pub fn compose_id(receipt_ref: &str, sku: &str, expiry: NaiveDate) -> String {
        format!("{}|{}|{}", receipt_ref, sku, expiry.format("%Y-%m-%d"))
    }
}

/// Daily sales aggregate, the forecast training source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub date: NaiveDate,
    pub qty_sold: i64,
    pub promo: bool,
}

/// Derived KPI snapshot; recomputable at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub sku: String,
    pub date: NaiveDate,
    pub mode: String,
    pub oos_rate: f64,
    pub fill_rate: f64,
    pub wmape: Option<f64>,
    pub bias: Option<f64>,
    pub lost_sales_estimate: f64,
    pub lookback_days: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for ev in [
            EventType::Snapshot,
            EventType::Order,
            EventType::Receipt,
            EventType::Sale,
            EventType::Waste,
            EventType::Adjust,
            EventType::Unfulfilled,
            EventType::SkuEdit,
            EventType::AssortmentIn,
            EventType::AssortmentOut,
            EventType::ExportLog,
        ] {
            assert_eq!(EventType::parse_str(ev.as_str()).unwrap(), ev);
        }
    }

    #[test]
    fn test_fold_priority_ordering() {
        assert!(EventType::Snapshot.fold_priority() < EventType::Order.fold_priority());
        assert!(EventType::Receipt.fold_priority() < EventType::Sale.fold_priority());
        assert!(EventType::Waste.fold_priority() < EventType::Adjust.fold_priority());
        assert!(EventType::Adjust.fold_priority() < EventType::Unfulfilled.fold_priority());
        assert!(EventType::SkuEdit.is_audit());
        assert!(!EventType::Sale.is_audit());
    }

    #[test]
    fn test_order_status_derivation() {
        assert_eq!(OrderStatus::derive(20, 0).unwrap(), OrderStatus::Pending);
        assert_eq!(OrderStatus::derive(20, 5).unwrap(), OrderStatus::Partial);
        assert_eq!(OrderStatus::derive(20, 20).unwrap(), OrderStatus::Received);
        assert!(OrderStatus::derive(20, 21).is_err());
        assert!(OrderStatus::derive(20, -1).is_err());
    }

    #[test]
    fn test_sku_validation_bounds() {
        let mut sku = Sku::new("A-100", "Whole milk 1L");
        assert!(sku.validate().is_ok());

        sku.moq = 0;
        assert!(sku.validate().is_err());
        sku.moq = 1;

        sku.lead_time_days = 366;
        assert!(sku.validate().is_err());
        sku.lead_time_days = 2;

        sku.target_csl = 1.0;
        assert!(sku.validate().is_err());
        sku.target_csl = 0.97;
        assert!(sku.validate().is_ok());
    }

    #[test]
    fn test_barcode_warns_never_fails() {
        let mut sku = Sku::new("A-100", "Whole milk 1L");
        sku.barcode = Some("4006381333931".to_string());
        assert!(sku.barcode_warning().is_none());

        sku.barcode = Some("not-an-ean".to_string());
        assert!(sku.barcode_warning().is_some());
        // Still validates: barcode problems warn, never fail.
        assert!(sku.validate().is_ok());

        sku.barcode = Some("".to_string());
        assert!(sku.barcode_warning().is_none());
    }

    #[test]
    fn test_lot_id_composition() {
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(
            Lot::compose_id("DDT-17", "A-100", expiry),
            "DDT-17|A-100|2026-03-15"
        );
    }
}
