use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{LedgerError, LedgerResult};
use super::store::LedgerStore;
use super::types::{LedgerEntry, TransferOutcome, TransferPlan, Wallet};

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Credit ledger facade used by the reconciler and the marketplace flows.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn LedgerStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validate and apply one business event.
    pub async fn transfer(&self, plan: &TransferPlan) -> LedgerResult<TransferOutcome> {
        plan.validate()?;

        let outcome = self.store.apply_transfer(plan).await.inspect_err(|e| {
            if let LedgerError::InsufficientBalance {
                user_id,
                available,
                required,
            } = e
            {
                warn!(
                    user_id = %user_id,
                    correlation_key = %plan.correlation_key,
                    available,
                    required,
                    "transfer rejected: insufficient balance"
                );
            }
        })?;

        match &outcome {
            TransferOutcome::Applied(entries) => info!(
                correlation_key = %plan.correlation_key,
                entries = entries.len(),
                "ledger transfer applied"
            ),
            TransferOutcome::AlreadyApplied(_) => info!(
                correlation_key = %plan.correlation_key,
                "ledger transfer already applied"
            ),
        }
        Ok(outcome)
    }

    pub async fn top_up(
        &self,
        user_id: Uuid,
        credits: i64,
        payment_id: &str,
        metadata: JsonValue,
    ) -> LedgerResult<TransferOutcome> {
        self.transfer(&TransferPlan::top_up(user_id, credits, payment_id, metadata))
            .await
    }

    pub async fn has_entry(&self, user_id: Uuid, correlation_key: &str) -> LedgerResult<bool> {
        self.store.has_entry(user_id, correlation_key).await
    }

    /// Wallet as stored, or an empty one for users that never transacted.
    pub async fn wallet(&self, user_id: Uuid) -> LedgerResult<Wallet> {
        Ok(self
            .store
            .find_wallet(user_id)
            .await?
            .unwrap_or_else(|| Wallet::empty(user_id)))
    }

    pub async fn recent_entries(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        self.store.recent_entries(user_id, limit).await
    }
}
