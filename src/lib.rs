//! stockpilot: single-location inventory and replenishment engine.
//!
//! The core is a deterministic, event-sourced stock ledger with FEFO lot
//! tracking, idempotent receipt closure and a service-level replenishment
//! policy. Storage is a single-writer SQLite database; all business
//! computation is synchronous and pure.

pub mod calendar;
pub mod error;
pub mod export;
pub mod fefo;
pub mod forecast;
pub mod kpi;
pub mod ledger;
pub mod models;
pub mod policy;
pub mod settings;
pub mod shelf_life;
pub mod store;
pub mod uncertainty;
pub mod workflow;

pub use error::{CoreError, CoreResult};
pub use models::{EventType, Lot, OrderLog, OrderStatus, Sku, Stock, Transaction};
pub use store::Database;
