//! Exception Revert
//!
//! Deletes targeted ledger rows inside a transaction. The surrogate id
//! makes single-row reverts precise; field matching exists for operators
//! who only know what happened, not which row it was. Reverting a RECEIPT
//! does not reverse its lot mutation; the operator is warned and the
//! reconciliation gate contains the divergence.

use chrono::NaiveDate;
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::models::EventType;
use crate::store::{audit_repo, ledger_repo, Database};

/// What to revert.
#[derive(Debug, Clone)]
pub enum RevertTarget {
    /// One specific ledger row.
    ById(i64),
    /// Every row matching (sku, date, event).
    ByFields {
        sku: String,
        date: NaiveDate,
        event: EventType,
    },
}

/// Outcome: deleted row count plus whether a lot-affecting event was
/// removed without touching the lot book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertOutcome {
    pub deleted: usize,
    pub lots_left_untouched: bool,
}

pub fn revert(db: &Database, target: &RevertTarget, actor: &str) -> CoreResult<RevertOutcome> {
    db.write(|tx| {
        let (ids, sku, event): (Vec<i64>, Option<String>, Option<EventType>) = match target {
            RevertTarget::ById(id) => {
                use rusqlite::OptionalExtension;
                let found: Option<(String, String)> = tx
                    .query_row(
                        "SELECT sku, event FROM transactions WHERE transaction_id = ?1",
                        [id],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?;
                match found {
                    Some((sku, event_text)) => (
                        vec![*id],
                        Some(sku),
                        EventType::parse_str(&event_text).ok(),
                    ),
                    None => (Vec::new(), None, None),
                }
            }
            RevertTarget::ByFields { sku, date, event } => {
                let ids = ledger_repo::find_ids(tx, sku, *date, *event)?;
                (ids, Some(sku.clone()), Some(*event))
            }
        };

        if ids.is_empty() {
            return Err(CoreError::NotFound(
                crate::error::Entity::Order,
                "no matching ledger rows".to_string(),
            ));
        }

        let mut deleted = 0;
        for id in &ids {
            if ledger_repo::delete_by_id(tx, *id)? {
                deleted += 1;
            }
        }

        let lots_left_untouched = matches!(event, Some(EventType::Receipt));
        if lots_left_untouched {
            warn!(
                sku = sku.as_deref().unwrap_or("?"),
                deleted,
                "RECEIPT reverted; corresponding lots were NOT reversed"
            );
        }

        audit_repo::append(
            tx,
            actor,
            "revert",
            sku.as_deref(),
            Some(&format!("deleted={} rows", deleted)),
        )?;
        Ok(RevertOutcome {
            deleted,
            lots_left_untouched,
        })
    })
}
