//! Workflows
//!
//! Entry points that compose repositories inside single transactions:
//! proposal generation, order confirmation, receipt closure, end-of-day
//! closure and exception revert. No global state; every entry point takes
//! the database handle explicitly.

pub mod eod;
pub mod orders;
pub mod propose;
pub mod receiving;
pub mod revert;

pub use eod::{close_day, EodLine};
pub use orders::{confirm_orders, ConfirmationItem, ConfirmedOrder};
pub use propose::{batch_proposals, friday_proposals_for_sku, proposal_for_sku};
pub use receiving::{
    close_order_short, close_receipt, Allocation, ReceiptItem, ReceiptOutcome, ReceiptSummary,
};
pub use revert::{revert, RevertOutcome, RevertTarget};
