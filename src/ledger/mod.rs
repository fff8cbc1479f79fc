//! Append-only credit ledger.
//!
//! Balances only move through [`CreditLedger::transfer`]; every transfer is
//! keyed by a correlation key so replays resolve to the first result.

pub mod error;
pub mod service;
pub mod store;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use service::CreditLedger;
pub use store::LedgerStore;
pub use types::{
    assignment_key, purchase_key, split_purchase, EntryKind, LedgerEntry, PurchaseSplit,
    TransferLeg, TransferOutcome, TransferPlan, Wallet, CREATOR_SHARE_PERCENT,
};
