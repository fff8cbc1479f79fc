use crate::database::error::DatabaseError;
use crate::payments::challenge::{ChallengePhase, ChallengeProgress, ChallengeState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceStatus::Pending)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(InvoiceStatus::Pending),
            "PAID" => Ok(InvoiceStatus::Paid),
            "FAILED" => Ok(InvoiceStatus::Failed),
            other => Err(DatabaseError::new(
                crate::database::error::DatabaseErrorKind::Unknown {
                    message: format!("unknown invoice status: {}", other),
                },
            )),
        }
    }
}

/// One card payment attempt for a credit top-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_id: Option<String>,
    pub credits: i64,
    pub amount_minor: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub challenge_state: Option<ChallengeState>,
    pub fingerprint_complete: bool,
    pub challenge_handled: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn challenge_progress(&self) -> ChallengeProgress {
        ChallengeProgress {
            fingerprint_complete: self.fingerprint_complete,
            challenge_handled: self.challenge_handled,
        }
    }

    /// Outstanding 3DS phase, if a challenge is attached.
    pub fn outstanding_phase(&self) -> Option<ChallengePhase> {
        self.challenge_state
            .as_ref()
            .map(|challenge| challenge.outstanding_phase(self.challenge_progress()))
    }
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub user_id: Uuid,
    pub credits: i64,
    pub amount_minor: i64,
    pub currency: String,
}

/// Invoice persistence. Status changes are conditional on the invoice still
/// being `PENDING`; every mutator returns the row as it stands afterwards,
/// so callers can tell a no-op from a transition.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn create(&self, invoice: NewInvoice) -> Result<Invoice, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, DatabaseError>;

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Invoice>, DatabaseError>;

    /// Record the gateway's payment id and, for 3DS, the challenge shape.
    async fn attach_payment(
        &self,
        id: Uuid,
        payment_id: &str,
        challenge: Option<&ChallengeState>,
    ) -> Result<Invoice, DatabaseError>;

    /// Store a challenge discovered after initiation. `fingerprint_complete`
    /// is only ever raised, never cleared.
    async fn set_challenge(
        &self,
        id: Uuid,
        challenge: &ChallengeState,
        fingerprint_complete: bool,
    ) -> Result<Invoice, DatabaseError>;

    async fn mark_fingerprint_complete(&self, id: Uuid) -> Result<Invoice, DatabaseError>;

    async fn mark_challenge_handled(&self, id: Uuid) -> Result<Invoice, DatabaseError>;

    async fn mark_paid(&self, id: Uuid) -> Result<Invoice, DatabaseError>;

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<Invoice, DatabaseError>;

    /// Oldest first.
    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invoice>, DatabaseError>;
}

#[cfg(feature = "database")]
pub use self::postgres::PgInvoiceRepository;

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use sqlx::{FromRow, PgPool};

    const INVOICE_COLUMNS: &str = "id, user_id, payment_id, credits, amount_minor, currency, \
         status, paid_at, challenge_state, fingerprint_complete, challenge_handled, \
         failure_reason, created_at, updated_at";

    #[derive(Debug, FromRow)]
    struct InvoiceRow {
        id: Uuid,
        user_id: Uuid,
        payment_id: Option<String>,
        credits: i64,
        amount_minor: i64,
        currency: String,
        status: String,
        paid_at: Option<DateTime<Utc>>,
        challenge_state: Option<serde_json::Value>,
        fingerprint_complete: bool,
        challenge_handled: bool,
        failure_reason: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl TryFrom<InvoiceRow> for Invoice {
        type Error = DatabaseError;

        fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
            let challenge_state = match row.challenge_state {
                Some(value) => Some(serde_json::from_value(value).map_err(|e| {
                    DatabaseError::new(crate::database::error::DatabaseErrorKind::Unknown {
                        message: format!("corrupt challenge_state on invoice {}: {}", row.id, e),
                    })
                })?),
                None => None,
            };

            Ok(Invoice {
                id: row.id,
                user_id: row.user_id,
                payment_id: row.payment_id,
                credits: row.credits,
                amount_minor: row.amount_minor,
                currency: row.currency,
                status: row.status.parse()?,
                paid_at: row.paid_at,
                challenge_state,
                fingerprint_complete: row.fingerprint_complete,
                challenge_handled: row.challenge_handled,
                failure_reason: row.failure_reason,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        }
    }

    fn challenge_json(challenge: &ChallengeState) -> Result<serde_json::Value, DatabaseError> {
        serde_json::to_value(challenge).map_err(|e| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::Unknown {
                message: format!("failed to encode challenge_state: {}", e),
            })
        })
    }

    /// Postgres-backed invoice repository
    pub struct PgInvoiceRepository {
        pool: PgPool,
    }

    impl PgInvoiceRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        async fn fetch(&self, id: Uuid) -> Result<Invoice, DatabaseError> {
            self.find_by_id(id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("invoice", id))
        }

        /// A conditional update that matched nothing yields the current row.
        async fn updated_or_current(
            &self,
            id: Uuid,
            row: Option<InvoiceRow>,
        ) -> Result<Invoice, DatabaseError> {
            match row {
                Some(row) => row.try_into(),
                None => self.fetch(id).await,
            }
        }
    }

    #[async_trait]
    impl InvoiceStore for PgInvoiceRepository {
        async fn create(&self, invoice: NewInvoice) -> Result<Invoice, DatabaseError> {
            let sql = format!(
                "INSERT INTO invoices (user_id, credits, amount_minor, currency, status)
                 VALUES ($1, $2, $3, $4, 'PENDING')
                 RETURNING {}",
                INVOICE_COLUMNS
            );
            sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(invoice.user_id)
                .bind(invoice.credits)
                .bind(invoice.amount_minor)
                .bind(&invoice.currency)
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .try_into()
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, DatabaseError> {
            let sql = format!("SELECT {} FROM invoices WHERE id = $1", INVOICE_COLUMNS);
            sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .map(Invoice::try_from)
                .transpose()
        }

        async fn find_by_payment_id(
            &self,
            payment_id: &str,
        ) -> Result<Option<Invoice>, DatabaseError> {
            let sql = format!(
                "SELECT {} FROM invoices WHERE payment_id = $1",
                INVOICE_COLUMNS
            );
            sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(payment_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .map(Invoice::try_from)
                .transpose()
        }

        async fn attach_payment(
            &self,
            id: Uuid,
            payment_id: &str,
            challenge: Option<&ChallengeState>,
        ) -> Result<Invoice, DatabaseError> {
            let challenge_value = challenge.map(challenge_json).transpose()?;
            let fingerprint = challenge
                .map(|c| c.implies_fingerprint_complete())
                .unwrap_or(false);
            let sql = format!(
                "UPDATE invoices
                 SET payment_id = $2,
                     challenge_state = $3,
                     fingerprint_complete = fingerprint_complete OR $4,
                     updated_at = NOW()
                 WHERE id = $1
                 RETURNING {}",
                INVOICE_COLUMNS
            );
            let row = sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(id)
                .bind(payment_id)
                .bind(challenge_value)
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            self.updated_or_current(id, row).await
        }

        async fn set_challenge(
            &self,
            id: Uuid,
            challenge: &ChallengeState,
            fingerprint_complete: bool,
        ) -> Result<Invoice, DatabaseError> {
            let sql = format!(
                "UPDATE invoices
                 SET challenge_state = $2,
                     fingerprint_complete = fingerprint_complete OR $3,
                     challenge_handled = CASE
                         WHEN $4 AND challenge_state IS DISTINCT FROM $2 THEN FALSE
                         ELSE challenge_handled
                     END,
                     updated_at = NOW()
                 WHERE id = $1 AND status = 'PENDING'
                 RETURNING {}",
                INVOICE_COLUMNS
            );
            let row = sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(id)
                .bind(challenge_json(challenge)?)
                .bind(fingerprint_complete)
                .bind(challenge.presents_challenge())
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            self.updated_or_current(id, row).await
        }

        async fn mark_fingerprint_complete(&self, id: Uuid) -> Result<Invoice, DatabaseError> {
            let sql = format!(
                "UPDATE invoices
                 SET fingerprint_complete = TRUE, updated_at = NOW()
                 WHERE id = $1 AND status = 'PENDING' AND NOT fingerprint_complete
                 RETURNING {}",
                INVOICE_COLUMNS
            );
            let row = sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            self.updated_or_current(id, row).await
        }

        async fn mark_challenge_handled(&self, id: Uuid) -> Result<Invoice, DatabaseError> {
            let sql = format!(
                "UPDATE invoices
                 SET challenge_handled = TRUE, updated_at = NOW()
                 WHERE id = $1 AND status = 'PENDING' AND NOT challenge_handled
                 RETURNING {}",
                INVOICE_COLUMNS
            );
            let row = sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            self.updated_or_current(id, row).await
        }

        async fn mark_paid(&self, id: Uuid) -> Result<Invoice, DatabaseError> {
            let sql = format!(
                "UPDATE invoices
                 SET status = 'PAID', paid_at = NOW(), failure_reason = NULL, updated_at = NOW()
                 WHERE id = $1 AND status = 'PENDING'
                 RETURNING {}",
                INVOICE_COLUMNS
            );
            let row = sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            self.updated_or_current(id, row).await
        }

        async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<Invoice, DatabaseError> {
            let sql = format!(
                "UPDATE invoices
                 SET status = 'FAILED', failure_reason = $2, updated_at = NOW()
                 WHERE id = $1 AND status = 'PENDING'
                 RETURNING {}",
                INVOICE_COLUMNS
            );
            let row = sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(id)
                .bind(reason)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            self.updated_or_current(id, row).await
        }

        async fn list_stale_pending(
            &self,
            created_before: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<Invoice>, DatabaseError> {
            let sql = format!(
                "SELECT {} FROM invoices
                 WHERE status = 'PENDING' AND created_at < $1
                 ORDER BY created_at ASC
                 LIMIT $2",
                INVOICE_COLUMNS
            );
            sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(created_before)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .into_iter()
                .map(Invoice::try_from)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [InvoiceStatus::Pending, InvoiceStatus::Paid, InvoiceStatus::Failed] {
            assert_eq!(status.as_str().parse::<InvoiceStatus>().unwrap(), status);
        }
        assert!("REFUNDED".parse::<InvoiceStatus>().is_err());
        assert!(!InvoiceStatus::Pending.is_terminal());
        assert!(InvoiceStatus::Failed.is_terminal());
    }
}
