//! Ledger data types and the transfer plan consumed by every store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::LedgerError;

/// Share of a licensed-asset sale that goes to the creator, in percent.
pub const CREATOR_SHARE_PERCENT: i64 = 80;

/// Kinds of ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Credits bought with a card payment.
    CreditTopUp,
    /// Buyer side of a licensed-asset sale.
    Purchase,
    /// Client side of a specialist hire.
    HirePayment,
    /// Seller side of a sale or hire.
    Earning,
    /// Platform share of a sale.
    PlatformFee,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::CreditTopUp => "credit_top_up",
            EntryKind::Purchase => "purchase",
            EntryKind::HirePayment => "hire_payment",
            EntryKind::Earning => "earning",
            EntryKind::PlatformFee => "platform_fee",
        }
    }

    pub fn counts_as_spend(&self) -> bool {
        matches!(self, EntryKind::Purchase | EntryKind::HirePayment)
    }

    pub fn counts_as_earning(&self) -> bool {
        matches!(self, EntryKind::Earning | EntryKind::PlatformFee)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_top_up" => Ok(EntryKind::CreditTopUp),
            "purchase" => Ok(EntryKind::Purchase),
            "hire_payment" => Ok(EntryKind::HirePayment),
            "earning" => Ok(EntryKind::Earning),
            "platform_fee" => Ok(EntryKind::PlatformFee),
            other => Err(LedgerError::InvalidTransfer(format!(
                "unknown entry kind: {}",
                other
            ))),
        }
    }
}

/// A user's credit balance. `balance` caches the signed sum of the
/// wallet's ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: i64,
    pub total_spent: i64,
    pub total_earnings: i64,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: 0,
            total_spent: 0,
            total_earnings: 0,
            updated_at: Utc::now(),
        }
    }

    /// Apply one signed leg to the cached counters.
    pub fn apply(&mut self, amount: i64, kind: EntryKind) {
        self.balance += amount;
        if kind.counts_as_spend() {
            self.total_spent += amount.abs();
        }
        if kind.counts_as_earning() {
            self.total_earnings += amount.abs();
        }
        self.updated_at = Utc::now();
    }
}

/// Immutable record of one signed balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
    pub kind: EntryKind,
    pub correlation_key: String,
    pub description: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// One side of a transfer. `amount` is always positive; the source leg is
/// debited and destination legs are credited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLeg {
    pub user_id: Uuid,
    pub amount: i64,
    pub kind: EntryKind,
    pub description: String,
}

impl TransferLeg {
    pub fn new(user_id: Uuid, amount: i64, kind: EntryKind, description: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            kind,
            description: description.into(),
        }
    }
}

/// Everything a store needs to apply one business event atomically.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub correlation_key: String,
    pub source: Option<TransferLeg>,
    pub destinations: Vec<TransferLeg>,
    pub metadata: JsonValue,
}

/// A signed leg ready to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedLeg<'a> {
    pub user_id: Uuid,
    pub amount: i64,
    pub kind: EntryKind,
    pub description: &'a str,
}

impl TransferPlan {
    /// Credits bought through the payment gateway, keyed by the gateway's
    /// payment id.
    pub fn top_up(user_id: Uuid, credits: i64, payment_id: &str, metadata: JsonValue) -> Self {
        Self {
            correlation_key: payment_id.to_string(),
            source: None,
            destinations: vec![TransferLeg::new(
                user_id,
                credits,
                EntryKind::CreditTopUp,
                format!("Purchased {} credits", credits),
            )],
            metadata,
        }
    }

    pub fn hire(client_id: Uuid, specialist_id: Uuid, price: i64, assignment_id: Uuid) -> Self {
        Self {
            correlation_key: assignment_key(assignment_id),
            source: Some(TransferLeg::new(
                client_id,
                price,
                EntryKind::HirePayment,
                "Hired specialist",
            )),
            destinations: vec![TransferLeg::new(
                specialist_id,
                price,
                EntryKind::Earning,
                "Assignment payment received",
            )],
            metadata: serde_json::json!({ "assignment_id": assignment_id }),
        }
    }

    /// Asset sale split between creator and platform. Zero-credit legs are
    /// left out; an asset owned by the platform wallet pays it the gross.
    pub fn purchase(
        buyer_id: Uuid,
        creator_id: Uuid,
        platform_id: Uuid,
        gross: i64,
        asset_id: Uuid,
        purchase_id: Uuid,
    ) -> Self {
        let split = split_purchase(gross);
        let mut destinations = Vec::with_capacity(2);
        if creator_id == platform_id {
            destinations.push(TransferLeg::new(
                creator_id,
                gross,
                EntryKind::Earning,
                "Asset license sold",
            ));
        } else if split.creator_cut > 0 {
            destinations.push(TransferLeg::new(
                creator_id,
                split.creator_cut,
                EntryKind::Earning,
                "Asset license sold",
            ));
        }
        if creator_id != platform_id && split.platform_cut > 0 {
            destinations.push(TransferLeg::new(
                platform_id,
                split.platform_cut,
                EntryKind::PlatformFee,
                "Platform fee on asset sale",
            ));
        }

        Self {
            correlation_key: purchase_key(purchase_id),
            source: Some(TransferLeg::new(
                buyer_id,
                gross,
                EntryKind::Purchase,
                "Purchased asset license",
            )),
            destinations,
            metadata: serde_json::json!({
                "asset_id": asset_id,
                "purchase_id": purchase_id,
                "creator_cut": split.creator_cut,
                "platform_cut": split.platform_cut,
            }),
        }
    }

    /// Wallet whose entry decides whether this plan was already applied.
    pub fn anchor(&self) -> Option<Uuid> {
        self.source
            .as_ref()
            .map(|leg| leg.user_id)
            .or_else(|| self.destinations.first().map(|leg| leg.user_id))
    }

    /// Participants in ascending id order, the lock order for stores.
    pub fn participants(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .source
            .iter()
            .chain(self.destinations.iter())
            .map(|leg| leg.user_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Source first, then destinations; debits carry a negative amount.
    pub fn signed_legs(&self) -> Vec<SignedLeg<'_>> {
        let debit = self.source.iter().map(|leg| SignedLeg {
            user_id: leg.user_id,
            amount: -leg.amount,
            kind: leg.kind,
            description: &leg.description,
        });
        let credits = self.destinations.iter().map(|leg| SignedLeg {
            user_id: leg.user_id,
            amount: leg.amount,
            kind: leg.kind,
            description: &leg.description,
        });
        debit.chain(credits).collect()
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.correlation_key.trim().is_empty() {
            return Err(LedgerError::InvalidTransfer(
                "correlation key must not be empty".to_string(),
            ));
        }
        if self.destinations.is_empty() {
            return Err(LedgerError::InvalidTransfer(
                "transfer needs at least one destination".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for leg in self.source.iter().chain(self.destinations.iter()) {
            if leg.amount <= 0 {
                return Err(LedgerError::InvalidTransfer(format!(
                    "leg amount must be positive, got {}",
                    leg.amount
                )));
            }
            if !seen.insert(leg.user_id) {
                return Err(LedgerError::InvalidTransfer(format!(
                    "wallet {} appears more than once",
                    leg.user_id
                )));
            }
        }

        let credited = self
            .destinations
            .iter()
            .try_fold(0i64, |acc, leg| acc.checked_add(leg.amount))
            .ok_or_else(|| LedgerError::InvalidTransfer("amount overflow".to_string()))?;

        match &self.source {
            Some(source) => {
                if source.amount != credited {
                    return Err(LedgerError::InvalidTransfer(format!(
                        "source debits {} but destinations receive {}",
                        source.amount, credited
                    )));
                }
                if source.kind == EntryKind::CreditTopUp {
                    return Err(LedgerError::InvalidTransfer(
                        "top-ups have no source wallet".to_string(),
                    ));
                }
            }
            None => {
                if self
                    .destinations
                    .iter()
                    .any(|leg| leg.kind != EntryKind::CreditTopUp)
                {
                    return Err(LedgerError::InvalidTransfer(
                        "only credit top-ups may create credits".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Result of applying a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Entries written by this call.
    Applied(Vec<LedgerEntry>),
    /// The correlation key was already recorded; the prior entries.
    AlreadyApplied(Vec<LedgerEntry>),
}

impl TransferOutcome {
    pub fn entries(&self) -> &[LedgerEntry] {
        match self {
            TransferOutcome::Applied(entries) | TransferOutcome::AlreadyApplied(entries) => {
                entries
            }
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransferOutcome::Applied(_))
    }

    /// Balance of `user_id` right after this transfer.
    pub fn balance_after(&self, user_id: Uuid) -> Option<i64> {
        self.entries()
            .iter()
            .find(|entry| entry.user_id == user_id)
            .map(|entry| entry.balance_after)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseSplit {
    pub gross: i64,
    pub creator_cut: i64,
    pub platform_cut: i64,
}

/// Creator gets `floor(gross * 80 / 100)`, the platform keeps the rest.
pub fn split_purchase(gross: i64) -> PurchaseSplit {
    let creator_cut = (i128::from(gross) * i128::from(CREATOR_SHARE_PERCENT) / 100) as i64;
    PurchaseSplit {
        gross,
        creator_cut,
        platform_cut: gross - creator_cut,
    }
}

pub fn purchase_key(purchase_id: Uuid) -> String {
    format!("purchase:{}", purchase_id)
}

pub fn assignment_key(assignment_id: Uuid) -> String {
    format!("assignment:{}", assignment_id)
}
