//! Settings and Holidays Repositories
//!
//! Single-row JSON containers with merge-on-read: a missing row or a
//! partial document always yields complete, defaulted settings. Unknown
//! sections survive a load/save cycle untouched.

use rusqlite::{Connection, OptionalExtension};

use crate::calendar::HolidaySet;
use crate::error::CoreResult;
use crate::settings::Settings;

pub fn load(conn: &Connection) -> CoreResult<Settings> {
    let raw: Option<String> = conn
        .query_row("SELECT document FROM settings WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match raw {
        Some(doc) => Settings::from_json(&doc),
        None => Ok(Settings::default()),
    }
}

pub fn save(conn: &Connection, settings: &Settings) -> CoreResult<()> {
    let doc = settings.to_json()?;
    conn.execute(
        "INSERT INTO settings (id, document) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET document = excluded.document",
        [doc],
    )?;
    Ok(())
}

pub fn load_holidays(conn: &Connection) -> CoreResult<HolidaySet> {
    let raw: Option<String> = conn
        .query_row("SELECT document FROM holidays WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match raw {
        Some(doc) if !doc.trim().is_empty() => {
            let rules = serde_json::from_str(&doc)?;
            Ok(HolidaySet { rules })
        }
        _ => Ok(HolidaySet::default()),
    }
}

pub fn save_holidays(conn: &Connection, holidays: &HolidaySet) -> CoreResult<()> {
    let doc = serde_json::to_string_pretty(&holidays.rules)?;
    conn.execute(
        "INSERT INTO holidays (id, document) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET document = excluded.document",
        [doc],
    )?;
    Ok(())
}
