//! SKU Repository
//!
//! Master-data access. Upserts validate ranges; a bad barcode is returned
//! as a warning, never an error. Deleting a SKU with ledger or order
//! history is blocked by the RESTRICT foreign keys and surfaces as a
//! constraint violation.

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use super::{fmt_date, parse_date};
use crate::error::{CoreError, CoreResult, Entity};
use crate::models::{DemandClass, EventType, ForecastMethod, Sku, WastePenaltyMode};

/// Optional filters for listing.
#[derive(Debug, Clone, Default)]
pub struct SkuFilter {
    pub in_assortment_only: bool,
    pub category: Option<String>,
}

fn row_to_sku(row: &Row<'_>) -> rusqlite::Result<Sku> {
    Ok(Sku {
        sku: row.get("sku")?,
        description: row.get("description")?,
        barcode: row.get("barcode")?,
        category: row.get("category")?,
        department: row.get("department")?,
        moq: row.get("moq")?,
        pack_size: row.get("pack_size")?,
        lead_time_days: row.get("lead_time_days")?,
        review_period_days: row.get("review_period_days")?,
        safety_stock: row.get("safety_stock")?,
        max_stock: row.get("max_stock")?,
        reorder_point: row.get("reorder_point")?,
        shelf_life_days: row.get("shelf_life_days")?,
        min_shelf_life_days: row.get("min_shelf_life_days")?,
        waste_penalty_mode: WastePenaltyMode::parse_str(
            &row.get::<_, String>("waste_penalty_mode")?,
        )
        .unwrap_or(WastePenaltyMode::None),
        waste_penalty_factor: row.get("waste_penalty_factor")?,
        waste_risk_threshold: row.get("waste_risk_threshold")?,
        demand_class: DemandClass::parse_str(&row.get::<_, String>("demand_class")?)
            .unwrap_or(DemandClass::Stable),
        forecast_method: ForecastMethod::parse_str(&row.get::<_, String>("forecast_method")?)
            .unwrap_or(ForecastMethod::Unset),
        target_csl: row.get("target_csl")?,
        in_assortment: row.get::<_, i64>("in_assortment")? != 0,
    })
}

const SKU_COLUMNS: &str = "sku, description, barcode, category, department, moq, pack_size, \
     lead_time_days, review_period_days, safety_stock, max_stock, reorder_point, \
     shelf_life_days, min_shelf_life_days, waste_penalty_mode, waste_penalty_factor, \
     waste_risk_threshold, demand_class, forecast_method, target_csl, in_assortment";

/// Insert or update a SKU. Returns the barcode warning when the EAN is
/// implausible; the write still goes through.
pub fn upsert(conn: &Connection, sku: &Sku) -> CoreResult<Option<String>> {
    sku.validate()?;
    let warning = sku.barcode_warning();
    if let Some(msg) = &warning {
        warn!("{}", msg);
    }
    conn.execute(
        "INSERT INTO skus (sku, description, barcode, category, department, moq, pack_size,
             lead_time_days, review_period_days, safety_stock, max_stock, reorder_point,
             shelf_life_days, min_shelf_life_days, waste_penalty_mode, waste_penalty_factor,
             waste_risk_threshold, demand_class, forecast_method, target_csl, in_assortment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21)
         ON CONFLICT(sku) DO UPDATE SET
            description = excluded.description,
            barcode = excluded.barcode,
            category = excluded.category,
            department = excluded.department,
            moq = excluded.moq,
            pack_size = excluded.pack_size,
            lead_time_days = excluded.lead_time_days,
            review_period_days = excluded.review_period_days,
            safety_stock = excluded.safety_stock,
            max_stock = excluded.max_stock,
            reorder_point = excluded.reorder_point,
            shelf_life_days = excluded.shelf_life_days,
            min_shelf_life_days = excluded.min_shelf_life_days,
            waste_penalty_mode = excluded.waste_penalty_mode,
            waste_penalty_factor = excluded.waste_penalty_factor,
            waste_risk_threshold = excluded.waste_risk_threshold,
            demand_class = excluded.demand_class,
            forecast_method = excluded.forecast_method,
            target_csl = excluded.target_csl,
            in_assortment = excluded.in_assortment",
        params![
            sku.sku.trim(),
            sku.description,
            sku.barcode.as_deref(),
            sku.category.as_deref(),
            sku.department.as_deref(),
            sku.moq,
            sku.pack_size,
            sku.lead_time_days,
            sku.review_period_days,
            sku.safety_stock,
            sku.max_stock,
            sku.reorder_point,
            sku.shelf_life_days,
            sku.min_shelf_life_days,
            sku.waste_penalty_mode.as_str(),
            sku.waste_penalty_factor,
            sku.waste_risk_threshold,
            sku.demand_class.as_str(),
            sku.forecast_method.as_str(),
            sku.target_csl,
            sku.in_assortment as i64,
        ],
    )?;
    Ok(warning)
}

pub fn get(conn: &Connection, sku: &str) -> CoreResult<Sku> {
    conn.query_row(
        &format!("SELECT {} FROM skus WHERE sku = ?1", SKU_COLUMNS),
        [sku],
        row_to_sku,
    )
    .optional()?
    .ok_or_else(|| CoreError::NotFound(Entity::Sku, sku.to_string()))
}

pub fn exists(conn: &Connection, sku: &str) -> CoreResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM skus WHERE sku = ?1", [sku], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn list(conn: &Connection, filter: &SkuFilter) -> CoreResult<Vec<Sku>> {
    let mut sql = format!("SELECT {} FROM skus WHERE 1=1", SKU_COLUMNS);
    if filter.in_assortment_only {
        sql.push_str(" AND in_assortment = 1");
    }
    if filter.category.is_some() {
        sql.push_str(" AND category = ?1");
    }
    sql.push_str(" ORDER BY sku ASC");

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = match &filter.category {
        Some(category) => stmt.query_map([category], row_to_sku)?,
        None => stmt.query_map([], row_to_sku)?,
    };
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Flip assortment membership and append the matching audit event to the
/// ledger in the same transaction.
pub fn set_assortment(
    conn: &Connection,
    sku: &str,
    in_assortment: bool,
    date: chrono::NaiveDate,
) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE skus SET in_assortment = ?1 WHERE sku = ?2",
        params![in_assortment as i64, sku],
    )?;
    if changed == 0 {
        return Err(CoreError::NotFound(Entity::Sku, sku.to_string()));
    }
    let event = if in_assortment {
        EventType::AssortmentIn
    } else {
        EventType::AssortmentOut
    };
    conn.execute(
        "INSERT INTO transactions (date, sku, event, qty) VALUES (?1, ?2, ?3, 0)",
        params![fmt_date(date), sku, event.as_str()],
    )?;
    Ok(())
}

/// Hard delete. Blocked while any history row references the SKU.
pub fn delete(conn: &Connection, sku: &str) -> CoreResult<()> {
    let result = conn.execute("DELETE FROM skus WHERE sku = ?1", [sku]);
    match result {
        Ok(0) => Err(CoreError::NotFound(Entity::Sku, sku.to_string())),
        Ok(_) => Ok(()),
        Err(e) => {
            let mapped: CoreError = e.into();
            match mapped {
                CoreError::Sqlite(inner) if is_fk_violation(&inner) => {
                    Err(CoreError::ConstraintViolation(format!(
                        "sku {} has history and cannot be deleted",
                        sku
                    )))
                }
                other => Err(other),
            }
        }
    }
}

fn is_fk_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Earliest sale date, used by maintenance passes. None without history.
pub fn first_activity_date(conn: &Connection, sku: &str) -> CoreResult<Option<chrono::NaiveDate>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT MIN(date) FROM transactions WHERE sku = ?1",
            [sku],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    text.map(|t| parse_date(&t)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[test]
    fn test_upsert_get_round_trip() {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            let mut sku = Sku::new("A-100", "Whole milk 1L");
            sku.barcode = Some("4006381333931".to_string());
            sku.shelf_life_days = 7;
            sku.demand_class = DemandClass::High;
            sku.forecast_method = ForecastMethod::Sba;
            assert!(upsert(tx, &sku)?.is_none());

            let loaded = get(tx, "A-100")?;
            assert_eq!(loaded.description, "Whole milk 1L");
            assert_eq!(loaded.shelf_life_days, 7);
            assert_eq!(loaded.demand_class, DemandClass::High);
            assert_eq!(loaded.forecast_method, ForecastMethod::Sba);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_bad_barcode_warns_but_writes() {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            let mut sku = Sku::new("A-101", "Bread");
            sku.barcode = Some("oops".to_string());
            let warning = upsert(tx, &sku)?;
            assert!(warning.is_some());
            assert!(exists(tx, "A-101")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let db = Database::in_memory().unwrap();
        let result = db.read(|conn| get(conn, "NOPE"));
        assert!(matches!(result, Err(CoreError::NotFound(Entity::Sku, _))));
    }

    #[test]
    fn test_delete_with_history_blocked() {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            upsert(tx, &Sku::new("A-102", "Eggs"))?;
            tx.execute(
                "INSERT INTO transactions (date, sku, event, qty)
                 VALUES ('2026-02-01', 'A-102', 'SALE', 2)",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let result = db.write(|tx| delete(tx, "A-102"));
        assert!(matches!(result, Err(CoreError::ConstraintViolation(_))));
    }

    #[test]
    fn test_set_assortment_writes_audit_event() {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            upsert(tx, &Sku::new("A-103", "Butter"))?;
            set_assortment(tx, "A-103", false, chrono::NaiveDate::from_ymd_opt(2026, 2, 1).unwrap())?;
            let loaded = get(tx, "A-103")?;
            assert!(!loaded.in_assortment);
            let events: i64 = tx.query_row(
                "SELECT COUNT(*) FROM transactions WHERE sku = 'A-103' AND event = 'ASSORTMENT_OUT'",
                [],
                |row| row.get(0),
            )?;
            assert_eq!(events, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_list_filters() {
        let db = Database::in_memory().unwrap();
        db.write(|tx| {
            let mut a = Sku::new("A-1", "One");
            a.category = Some("dairy".to_string());
            upsert(tx, &a)?;
            let mut b = Sku::new("A-2", "Two");
            b.in_assortment = false;
            upsert(tx, &b)?;
            Ok(())
        })
        .unwrap();
        let all = db.read(|conn| list(conn, &SkuFilter::default())).unwrap();
        assert_eq!(all.len(), 2);
        let active = db
            .read(|conn| {
                list(
                    conn,
                    &SkuFilter {
                        in_assortment_only: true,
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        assert_eq!(active.len(), 1);
        let dairy = db
            .read(|conn| {
                list(
                    conn,
                    &SkuFilter {
                        category: Some("dairy".to_string()),
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        assert_eq!(dairy.len(), 1);
        assert_eq!(dairy[0].sku, "A-1");
    }
}
