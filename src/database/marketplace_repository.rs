use crate::database::error::{DatabaseError, DatabaseErrorKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "PENDING",
            AssignmentStatus::InProgress => "IN_PROGRESS",
            AssignmentStatus::Completed => "COMPLETED",
            AssignmentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(AssignmentStatus::Pending),
            "IN_PROGRESS" => Ok(AssignmentStatus::InProgress),
            "COMPLETED" => Ok(AssignmentStatus::Completed),
            "CANCELLED" => Ok(AssignmentStatus::Cancelled),
            other => Err(DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unknown assignment status: {}", other),
            })),
        }
    }
}

/// A client's request to hire a specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub specialist_id: Uuid,
    pub price: i64,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A photo or other asset that can be licensed for credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensedAsset {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseStatus {
    Completed,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Completed => "COMPLETED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub asset_id: Uuid,
    pub price: i64,
    pub creator_cut: i64,
    pub platform_cut: i64,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub asset_id: Uuid,
    pub price: i64,
    pub creator_cut: i64,
    pub platform_cut: i64,
}

/// Read and transition access to assignments, assets and purchases. Their
/// creation happens outside this service.
#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    async fn find_assignment(&self, id: Uuid) -> Result<Option<Assignment>, DatabaseError>;

    /// Move a `PENDING` assignment to `IN_PROGRESS`. Returns the row as it
    /// stands afterwards.
    async fn start_assignment(&self, id: Uuid) -> Result<Assignment, DatabaseError>;

    async fn find_asset(&self, id: Uuid) -> Result<Option<LicensedAsset>, DatabaseError>;

    async fn find_purchase(&self, id: Uuid) -> Result<Option<Purchase>, DatabaseError>;

    async fn find_completed_purchase(
        &self,
        buyer_id: Uuid,
        asset_id: Uuid,
    ) -> Result<Option<Purchase>, DatabaseError>;

    /// Insert a completed purchase; an existing row with the same id is
    /// returned instead.
    async fn record_purchase(&self, purchase: NewPurchase) -> Result<Purchase, DatabaseError>;
}

#[cfg(feature = "database")]
pub use self::postgres::PgMarketplaceRepository;

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use sqlx::{FromRow, PgPool};

    #[derive(Debug, FromRow)]
    struct AssignmentRow {
        id: Uuid,
        client_id: Uuid,
        specialist_id: Uuid,
        price: i64,
        status: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl TryFrom<AssignmentRow> for Assignment {
        type Error = DatabaseError;

        fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
            Ok(Assignment {
                id: row.id,
                client_id: row.client_id,
                specialist_id: row.specialist_id,
                price: row.price,
                status: row.status.parse()?,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        }
    }

    #[derive(Debug, FromRow)]
    struct AssetRow {
        id: Uuid,
        owner_id: Uuid,
        title: String,
        price: i64,
        created_at: DateTime<Utc>,
    }

    impl From<AssetRow> for LicensedAsset {
        fn from(row: AssetRow) -> Self {
            LicensedAsset {
                id: row.id,
                owner_id: row.owner_id,
                title: row.title,
                price: row.price,
                created_at: row.created_at,
            }
        }
    }

    #[derive(Debug, FromRow)]
    struct PurchaseRow {
        id: Uuid,
        buyer_id: Uuid,
        asset_id: Uuid,
        price: i64,
        creator_cut: i64,
        platform_cut: i64,
        created_at: DateTime<Utc>,
    }

    impl From<PurchaseRow> for Purchase {
        fn from(row: PurchaseRow) -> Self {
            Purchase {
                id: row.id,
                buyer_id: row.buyer_id,
                asset_id: row.asset_id,
                price: row.price,
                creator_cut: row.creator_cut,
                platform_cut: row.platform_cut,
                status: PurchaseStatus::Completed,
                created_at: row.created_at,
            }
        }
    }

    /// Postgres-backed marketplace repository
    pub struct PgMarketplaceRepository {
        pool: PgPool,
    }

    impl PgMarketplaceRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl MarketplaceStore for PgMarketplaceRepository {
        async fn find_assignment(&self, id: Uuid) -> Result<Option<Assignment>, DatabaseError> {
            sqlx::query_as::<_, AssignmentRow>(
                "SELECT id, client_id, specialist_id, price, status, created_at, updated_at
                 FROM assignments
                 WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Assignment::try_from)
            .transpose()
        }

        async fn start_assignment(&self, id: Uuid) -> Result<Assignment, DatabaseError> {
            sqlx::query(
                "UPDATE assignments
                 SET status = 'IN_PROGRESS', updated_at = NOW()
                 WHERE id = $1 AND status = 'PENDING'",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            self.find_assignment(id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("assignment", id))
        }

        async fn find_asset(&self, id: Uuid) -> Result<Option<LicensedAsset>, DatabaseError> {
            sqlx::query_as::<_, AssetRow>(
                "SELECT id, owner_id, title, price, created_at FROM licensed_assets WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(LicensedAsset::from))
            .map_err(DatabaseError::from_sqlx)
        }

        async fn find_purchase(&self, id: Uuid) -> Result<Option<Purchase>, DatabaseError> {
            sqlx::query_as::<_, PurchaseRow>(
                "SELECT id, buyer_id, asset_id, price, creator_cut, platform_cut, created_at
                 FROM purchases
                 WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Purchase::from))
            .map_err(DatabaseError::from_sqlx)
        }

        async fn find_completed_purchase(
            &self,
            buyer_id: Uuid,
            asset_id: Uuid,
        ) -> Result<Option<Purchase>, DatabaseError> {
            sqlx::query_as::<_, PurchaseRow>(
                "SELECT id, buyer_id, asset_id, price, creator_cut, platform_cut, created_at
                 FROM purchases
                 WHERE buyer_id = $1 AND asset_id = $2 AND status = 'COMPLETED'
                 ORDER BY created_at ASC
                 LIMIT 1",
            )
            .bind(buyer_id)
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Purchase::from))
            .map_err(DatabaseError::from_sqlx)
        }

        async fn record_purchase(&self, purchase: NewPurchase) -> Result<Purchase, DatabaseError> {
            sqlx::query(
                "INSERT INTO purchases
                 (id, buyer_id, asset_id, price, creator_cut, platform_cut, status)
                 VALUES ($1, $2, $3, $4, $5, $6, 'COMPLETED')
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(purchase.id)
            .bind(purchase.buyer_id)
            .bind(purchase.asset_id)
            .bind(purchase.price)
            .bind(purchase.creator_cut)
            .bind(purchase.platform_cut)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            self.find_purchase(purchase.id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("purchase", purchase.id))
        }
    }
}
