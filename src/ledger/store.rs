use async_trait::async_trait;
use uuid::Uuid;

use super::error::LedgerResult;
use super::types::{LedgerEntry, TransferOutcome, TransferPlan, Wallet};

/// Persistence behind the credit ledger.
///
/// `apply_transfer` is the only way balances change. Implementations must:
/// return `AlreadyApplied` with every entry carrying the plan's correlation
/// key when the anchor wallet already holds one; reject an under-funded
/// source with `InsufficientBalance` before writing anything; and write all
/// legs plus the cached wallet counters as one all-or-nothing unit. A
/// concurrent duplicate that loses on the `(user_id, correlation_key)`
/// uniqueness rule also resolves to `AlreadyApplied`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn apply_transfer(&self, plan: &TransferPlan) -> LedgerResult<TransferOutcome>;

    async fn has_entry(&self, user_id: Uuid, correlation_key: &str) -> LedgerResult<bool>;

    async fn entries_for_key(&self, correlation_key: &str) -> LedgerResult<Vec<LedgerEntry>>;

    async fn find_wallet(&self, user_id: Uuid) -> LedgerResult<Option<Wallet>>;

    /// Newest first.
    async fn recent_entries(&self, user_id: Uuid, limit: i64) -> LedgerResult<Vec<LedgerEntry>>;
}
