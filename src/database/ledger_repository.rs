//! Postgres implementation of [`LedgerStore`].

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::store::LedgerStore;
use crate::ledger::types::{EntryKind, LedgerEntry, TransferOutcome, TransferPlan, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, user_id, amount, balance_after, kind, correlation_key, \
     description, metadata, created_at";

#[derive(Debug, FromRow)]
struct EntryRow {
    id: Uuid,
    user_id: Uuid,
    amount: i64,
    balance_after: i64,
    kind: String,
    correlation_key: String,
    description: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            balance_after: row.balance_after,
            kind: row.kind.parse::<EntryKind>()?,
            correlation_key: row.correlation_key,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WalletRow {
    user_id: Uuid,
    balance: i64,
    total_spent: i64,
    total_earnings: i64,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            user_id: row.user_id,
            balance: row.balance,
            total_spent: row.total_spent,
            total_earnings: row.total_earnings,
            updated_at: row.updated_at,
        }
    }
}

/// Ledger repository backed by the `wallets` and `ledger_entries` tables.
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_plan(
        tx: &mut Transaction<'static, Postgres>,
        plan: &TransferPlan,
    ) -> LedgerResult<Option<Vec<LedgerEntry>>> {
        let anchor = plan
            .anchor()
            .ok_or_else(|| LedgerError::InvalidTransfer("transfer has no wallets".to_string()))?;

        // Lazily create wallets, then lock them in ascending id order.
        for user_id in plan.participants() {
            sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
                .bind(user_id)
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        }
        for user_id in plan.participants() {
            sqlx::query("SELECT user_id FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        }

        // Under the row locks, so a duplicate committed while we waited is seen.
        let seen: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM ledger_entries WHERE user_id = $1 AND correlation_key = $2",
        )
        .bind(anchor)
        .bind(&plan.correlation_key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        if seen.is_some() {
            return Ok(None);
        }

        if let Some(source) = &plan.source {
            let (available,): (i64,) =
                sqlx::query_as("SELECT balance FROM wallets WHERE user_id = $1")
                    .bind(source.user_id)
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(DatabaseError::from_sqlx)?;
            if available < source.amount {
                return Err(LedgerError::InsufficientBalance {
                    user_id: source.user_id,
                    available,
                    required: source.amount,
                });
            }
        }

        let insert_sql = format!(
            "INSERT INTO ledger_entries
             (user_id, amount, balance_after, kind, correlation_key, description, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            ENTRY_COLUMNS
        );

        let mut entries = Vec::with_capacity(plan.destinations.len() + 1);
        for leg in plan.signed_legs() {
            let spent = if leg.kind.counts_as_spend() { leg.amount.abs() } else { 0 };
            let earned = if leg.kind.counts_as_earning() { leg.amount.abs() } else { 0 };

            let (balance_after,): (i64,) = sqlx::query_as(
                "UPDATE wallets
                 SET balance = balance + $2,
                     total_spent = total_spent + $3,
                     total_earnings = total_earnings + $4,
                     updated_at = NOW()
                 WHERE user_id = $1
                 RETURNING balance",
            )
            .bind(leg.user_id)
            .bind(leg.amount)
            .bind(spent)
            .bind(earned)
            .fetch_one(&mut **tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            let row = sqlx::query_as::<_, EntryRow>(&insert_sql)
                .bind(leg.user_id)
                .bind(leg.amount)
                .bind(balance_after)
                .bind(leg.kind.as_str())
                .bind(&plan.correlation_key)
                .bind(leg.description)
                .bind(&plan.metadata)
                .fetch_one(&mut **tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            entries.push(LedgerEntry::try_from(row)?);
        }

        Ok(Some(entries))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerRepository {
    async fn apply_transfer(&self, plan: &TransferPlan) -> LedgerResult<TransferOutcome> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        match Self::write_plan(&mut tx, plan).await {
            Ok(Some(entries)) => match tx.commit().await {
                Ok(()) => Ok(TransferOutcome::Applied(entries)),
                Err(e) => {
                    let err = DatabaseError::from_sqlx(e);
                    if err.is_unique_violation() {
                        self.already_applied(plan).await
                    } else {
                        Err(err.into())
                    }
                }
            },
            Ok(None) => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                debug!(correlation_key = %plan.correlation_key, "correlation key already recorded");
                self.already_applied(plan).await
            }
            Err(LedgerError::Storage(DatabaseError {
                kind: DatabaseErrorKind::UniqueViolation { .. },
            })) => {
                // Concurrent duplicate committed first.
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                info!(correlation_key = %plan.correlation_key, "lost duplicate transfer race");
                self.already_applied(plan).await
            }
            Err(e) => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                Err(e)
            }
        }
    }

    async fn has_entry(&self, user_id: Uuid, correlation_key: &str) -> LedgerResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1 FROM ledger_entries WHERE user_id = $1 AND correlation_key = $2
             )",
        )
        .bind(user_id)
        .bind(correlation_key)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(exists)
    }

    async fn entries_for_key(&self, correlation_key: &str) -> LedgerResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE correlation_key = $1 ORDER BY created_at, id",
            ENTRY_COLUMNS
        );
        sqlx::query_as::<_, EntryRow>(&sql)
            .bind(correlation_key)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect()
    }

    async fn find_wallet(&self, user_id: Uuid) -> LedgerResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT user_id, balance, total_spent, total_earnings, updated_at
             FROM wallets
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(Wallet::from))
    }

    async fn recent_entries(&self, user_id: Uuid, limit: i64) -> LedgerResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entries
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
            ENTRY_COLUMNS
        );
        sqlx::query_as::<_, EntryRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect()
    }
}

impl PgLedgerRepository {
    async fn already_applied(&self, plan: &TransferPlan) -> LedgerResult<TransferOutcome> {
        Ok(TransferOutcome::AlreadyApplied(
            self.entries_for_key(&plan.correlation_key).await?,
        ))
    }
}
