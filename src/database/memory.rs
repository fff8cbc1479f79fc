//! In-memory stores with the same contracts as the Postgres repositories.
//!
//! One async mutex guards all state, so a ledger transfer is atomic with
//! respect to every other operation. Used with `SKIP_EXTERNALS=true` and in
//! tests.

use crate::database::error::DatabaseError;
use crate::database::invoice_repository::{Invoice, InvoiceStatus, InvoiceStore, NewInvoice};
use crate::database::marketplace_repository::{
    Assignment, AssignmentStatus, LicensedAsset, MarketplaceStore, NewPurchase, Purchase,
    PurchaseStatus,
};
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::store::LedgerStore;
use crate::ledger::types::{LedgerEntry, TransferOutcome, TransferPlan, Wallet};
use crate::payments::challenge::ChallengeState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    invoices: HashMap<Uuid, Invoice>,
    wallets: HashMap<Uuid, Wallet>,
    entries: Vec<LedgerEntry>,
    entry_keys: HashSet<(Uuid, String)>,
    assignments: HashMap<Uuid, Assignment>,
    assets: HashMap<Uuid, LicensedAsset>,
    purchases: HashMap<Uuid, Purchase>,
}

impl State {
    fn invoice_mut(&mut self, id: Uuid) -> Result<&mut Invoice, DatabaseError> {
        self.invoices
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("invoice", id))
    }

    fn entries_for_key(&self, correlation_key: &str) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.correlation_key == correlation_key)
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_assignment(
        &self,
        client_id: Uuid,
        specialist_id: Uuid,
        price: i64,
    ) -> Assignment {
        let now = Utc::now();
        let assignment = Assignment {
            id: Uuid::new_v4(),
            client_id,
            specialist_id,
            price,
            status: AssignmentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .assignments
            .insert(assignment.id, assignment.clone());
        assignment
    }

    pub async fn insert_asset(&self, owner_id: Uuid, title: &str, price: i64) -> LicensedAsset {
        let asset = LicensedAsset {
            id: Uuid::new_v4(),
            owner_id,
            title: title.to_string(),
            price,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .assets
            .insert(asset.id, asset.clone());
        asset
    }

    /// Move an invoice's creation time back, for expiry scenarios.
    pub async fn backdate_invoice(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(invoice) = self.state.lock().await.invoices.get_mut(&id) {
            invoice.created_at = created_at;
        }
    }

    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Signed sum of a wallet's entries, for checking the cached balance.
    pub async fn ledger_sum(&self, user_id: Uuid) -> i64 {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.amount)
            .sum()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn apply_transfer(&self, plan: &TransferPlan) -> LedgerResult<TransferOutcome> {
        let mut state = self.state.lock().await;

        let anchor = plan
            .anchor()
            .ok_or_else(|| LedgerError::InvalidTransfer("transfer has no wallets".to_string()))?;
        if state
            .entry_keys
            .contains(&(anchor, plan.correlation_key.clone()))
        {
            return Ok(TransferOutcome::AlreadyApplied(
                state.entries_for_key(&plan.correlation_key),
            ));
        }

        if let Some(source) = &plan.source {
            let available = state
                .wallets
                .get(&source.user_id)
                .map(|wallet| wallet.balance)
                .unwrap_or(0);
            if available < source.amount {
                return Err(LedgerError::InsufficientBalance {
                    user_id: source.user_id,
                    available,
                    required: source.amount,
                });
            }
        }

        let legs = plan.signed_legs();
        if legs.iter().any(|leg| {
            state
                .entry_keys
                .contains(&(leg.user_id, plan.correlation_key.clone()))
        }) {
            return Err(DatabaseError::new(
                crate::database::error::DatabaseErrorKind::UniqueViolation {
                    constraint: Some("ledger_entries_user_correlation_key".to_string()),
                },
            )
            .into());
        }

        // All checks passed; nothing below can fail.
        let now = Utc::now();
        let mut written = Vec::with_capacity(legs.len());
        for leg in legs {
            let wallet = state
                .wallets
                .entry(leg.user_id)
                .or_insert_with(|| Wallet::empty(leg.user_id));
            wallet.apply(leg.amount, leg.kind);
            let entry = LedgerEntry {
                id: Uuid::new_v4(),
                user_id: leg.user_id,
                amount: leg.amount,
                balance_after: wallet.balance,
                kind: leg.kind,
                correlation_key: plan.correlation_key.clone(),
                description: leg.description.to_string(),
                metadata: plan.metadata.clone(),
                created_at: now,
            };
            state
                .entry_keys
                .insert((leg.user_id, plan.correlation_key.clone()));
            state.entries.push(entry.clone());
            written.push(entry);
        }

        Ok(TransferOutcome::Applied(written))
    }

    async fn has_entry(&self, user_id: Uuid, correlation_key: &str) -> LedgerResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .entry_keys
            .contains(&(user_id, correlation_key.to_string())))
    }

    async fn entries_for_key(&self, correlation_key: &str) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.state.lock().await.entries_for_key(correlation_key))
    }

    async fn find_wallet(&self, user_id: Uuid) -> LedgerResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&user_id).cloned())
    }

    async fn recent_entries(&self, user_id: Uuid, limit: i64) -> LedgerResult<Vec<LedgerEntry>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state
            .lock()
            .await
            .entries
            .iter()
            .rev()
            .filter(|entry| entry.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InvoiceStore for InMemoryStore {
    async fn create(&self, new: NewInvoice) -> Result<Invoice, DatabaseError> {
        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            payment_id: None,
            credits: new.credits,
            amount_minor: new.amount_minor,
            currency: new.currency,
            status: InvoiceStatus::Pending,
            paid_at: None,
            challenge_state: None,
            fingerprint_complete: false,
            challenge_handled: false,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .invoices
            .insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, DatabaseError> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Invoice>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .await
            .invoices
            .values()
            .find(|invoice| invoice.payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn attach_payment(
        &self,
        id: Uuid,
        payment_id: &str,
        challenge: Option<&ChallengeState>,
    ) -> Result<Invoice, DatabaseError> {
        let mut state = self.state.lock().await;
        let taken = state
            .invoices
            .values()
            .any(|other| other.id != id && other.payment_id.as_deref() == Some(payment_id));
        if taken {
            return Err(DatabaseError::new(
                crate::database::error::DatabaseErrorKind::UniqueViolation {
                    constraint: Some("invoices_payment_id_key".to_string()),
                },
            ));
        }

        let invoice = state.invoice_mut(id)?;
        invoice.payment_id = Some(payment_id.to_string());
        invoice.challenge_state = challenge.cloned();
        if challenge.is_some_and(|c| c.implies_fingerprint_complete()) {
            invoice.fingerprint_complete = true;
        }
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    async fn set_challenge(
        &self,
        id: Uuid,
        challenge: &ChallengeState,
        fingerprint_complete: bool,
    ) -> Result<Invoice, DatabaseError> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(id)?;
        if invoice.status == InvoiceStatus::Pending {
            if challenge.resets_challenge(invoice.challenge_state.as_ref()) {
                invoice.challenge_handled = false;
            }
            invoice.challenge_state = Some(challenge.clone());
            invoice.fingerprint_complete |= fingerprint_complete;
            invoice.updated_at = Utc::now();
        }
        Ok(invoice.clone())
    }

    async fn mark_fingerprint_complete(&self, id: Uuid) -> Result<Invoice, DatabaseError> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(id)?;
        if invoice.status == InvoiceStatus::Pending && !invoice.fingerprint_complete {
            invoice.fingerprint_complete = true;
            invoice.updated_at = Utc::now();
        }
        Ok(invoice.clone())
    }

    async fn mark_challenge_handled(&self, id: Uuid) -> Result<Invoice, DatabaseError> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(id)?;
        if invoice.status == InvoiceStatus::Pending && !invoice.challenge_handled {
            invoice.challenge_handled = true;
            invoice.updated_at = Utc::now();
        }
        Ok(invoice.clone())
    }

    async fn mark_paid(&self, id: Uuid) -> Result<Invoice, DatabaseError> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(id)?;
        if invoice.status == InvoiceStatus::Pending {
            let now = Utc::now();
            invoice.status = InvoiceStatus::Paid;
            invoice.paid_at = Some(now);
            invoice.failure_reason = None;
            invoice.updated_at = now;
        }
        Ok(invoice.clone())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<Invoice, DatabaseError> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(id)?;
        if invoice.status == InvoiceStatus::Pending {
            invoice.status = InvoiceStatus::Failed;
            invoice.failure_reason = Some(reason.to_string());
            invoice.updated_at = Utc::now();
        }
        Ok(invoice.clone())
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invoice>, DatabaseError> {
        let state = self.state.lock().await;
        let mut stale: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| {
                invoice.status == InvoiceStatus::Pending && invoice.created_at < created_before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|invoice| invoice.created_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }
}

#[async_trait]
impl MarketplaceStore for InMemoryStore {
    async fn find_assignment(&self, id: Uuid) -> Result<Option<Assignment>, DatabaseError> {
        Ok(self.state.lock().await.assignments.get(&id).cloned())
    }

    async fn start_assignment(&self, id: Uuid) -> Result<Assignment, DatabaseError> {
        let mut state = self.state.lock().await;
        let assignment = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("assignment", id))?;
        if assignment.status == AssignmentStatus::Pending {
            assignment.status = AssignmentStatus::InProgress;
            assignment.updated_at = Utc::now();
        }
        Ok(assignment.clone())
    }

    async fn find_asset(&self, id: Uuid) -> Result<Option<LicensedAsset>, DatabaseError> {
        Ok(self.state.lock().await.assets.get(&id).cloned())
    }

    async fn find_purchase(&self, id: Uuid) -> Result<Option<Purchase>, DatabaseError> {
        Ok(self.state.lock().await.purchases.get(&id).cloned())
    }

    async fn find_completed_purchase(
        &self,
        buyer_id: Uuid,
        asset_id: Uuid,
    ) -> Result<Option<Purchase>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .await
            .purchases
            .values()
            .filter(|p| {
                p.buyer_id == buyer_id
                    && p.asset_id == asset_id
                    && p.status == PurchaseStatus::Completed
            })
            .min_by_key(|p| p.created_at)
            .cloned())
    }

    async fn record_purchase(&self, new: NewPurchase) -> Result<Purchase, DatabaseError> {
        let mut state = self.state.lock().await;
        let purchase = state.purchases.entry(new.id).or_insert_with(|| Purchase {
            id: new.id,
            buyer_id: new.buyer_id,
            asset_id: new.asset_id,
            price: new.price,
            creator_cut: new.creator_cut,
            platform_cut: new.platform_cut,
            status: PurchaseStatus::Completed,
            created_at: Utc::now(),
        });
        Ok(purchase.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::EntryKind;
    use serde_json::Value as JsonValue;

    #[tokio::test]
    async fn transfer_is_all_or_nothing_when_underfunded() {
        let store = InMemoryStore::new();
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        store
            .apply_transfer(&TransferPlan::top_up(buyer, 30, "pay_1", JsonValue::Null))
            .await
            .unwrap();

        let err = store
            .apply_transfer(&TransferPlan::hire(buyer, seller, 50, Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 30,
                required: 50,
                ..
            }
        ));
        assert_eq!(store.entry_count().await, 1);
        assert!(store.find_wallet(seller).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replay_returns_prior_entries() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let plan = TransferPlan::top_up(user, 10, "pay_2", JsonValue::Null);

        let first = store.apply_transfer(&plan).await.unwrap();
        let second = store.apply_transfer(&plan).await.unwrap();

        assert!(first.is_applied());
        assert!(!second.is_applied());
        assert_eq!(first.entries(), second.entries());
        assert_eq!(store.find_wallet(user).await.unwrap().unwrap().balance, 10);
        assert_eq!(first.entries()[0].kind, EntryKind::CreditTopUp);
    }

    #[tokio::test]
    async fn terminal_invoice_ignores_further_transitions() {
        let store = InMemoryStore::new();
        let invoice = store
            .create(NewInvoice {
                user_id: Uuid::new_v4(),
                credits: 10,
                amount_minor: 1000,
                currency: "USD".to_string(),
            })
            .await
            .unwrap();

        let paid = store.mark_paid(invoice.id).await.unwrap();
        let after = store.mark_failed(invoice.id, "late decline").await.unwrap();

        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(after.status, InvoiceStatus::Paid);
        assert_eq!(after.paid_at, paid.paid_at);
        assert!(after.failure_reason.is_none());
    }

    #[tokio::test]
    async fn payment_id_is_unique_across_invoices() {
        let store = InMemoryStore::new();
        let new = || NewInvoice {
            user_id: Uuid::new_v4(),
            credits: 1,
            amount_minor: 100,
            currency: "USD".to_string(),
        };
        let a = store.create(new()).await.unwrap();
        let b = store.create(new()).await.unwrap();
        store.attach_payment(a.id, "pay_dup", None).await.unwrap();
        let err = store.attach_payment(b.id, "pay_dup", None).await.unwrap_err();
        assert!(err.is_unique_violation());
    }
}
