//! Hire and purchase flows.
//!
//! Both follow the same order: check the precondition, move credits through
//! the ledger, then flip the business record. The ledger transfer is keyed by
//! the assignment or purchase id, so re-running a flow that died after the
//! transfer finishes the record without debiting twice.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::marketplace_repository::{
    Assignment, AssignmentStatus, MarketplaceStore, NewPurchase, Purchase,
};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::ledger::{
    assignment_key, purchase_key, split_purchase, CreditLedger, LedgerError, TransferPlan,
};

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("assignment {0} not found")]
    AssignmentNotFound(Uuid),

    #[error("asset {0} not found")]
    AssetNotFound(Uuid),

    #[error("assignment {assignment_id} is {current}, expected PENDING")]
    AssignmentNotPending {
        assignment_id: Uuid,
        current: AssignmentStatus,
    },

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("asset {0} already purchased")]
    AlreadyPurchased(Uuid),

    #[error("purchase id {0} belongs to another purchase")]
    PurchaseIdConflict(Uuid),

    #[error("{available} credits available, {required} required")]
    InsufficientCredits { available: i64, required: i64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

impl From<MarketplaceError> for AppError {
    fn from(err: MarketplaceError) -> Self {
        let domain = match err {
            MarketplaceError::AssignmentNotFound(id) => DomainError::AssignmentNotFound {
                assignment_id: id.to_string(),
            },
            MarketplaceError::AssetNotFound(id) => DomainError::AssetNotFound {
                asset_id: id.to_string(),
            },
            MarketplaceError::AssignmentNotPending { current, .. } => DomainError::InvalidState {
                entity: "assignment".to_string(),
                current: current.to_string(),
                expected: AssignmentStatus::Pending.to_string(),
            },
            MarketplaceError::Forbidden(reason) => DomainError::Forbidden {
                reason: reason.to_string(),
            },
            MarketplaceError::AlreadyPurchased(id) => DomainError::AlreadyPurchased {
                asset_id: id.to_string(),
            },
            MarketplaceError::PurchaseIdConflict(id) => DomainError::DuplicateTransaction {
                correlation_key: purchase_key(id),
            },
            MarketplaceError::InsufficientCredits {
                available,
                required,
            } => DomainError::InsufficientBalance {
                available,
                required,
            },
            MarketplaceError::Ledger(e) => return e.into(),
            MarketplaceError::Storage(e) => return e.into(),
        };
        AppError::new(AppErrorKind::Domain(domain))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HireReceipt {
    pub assignment: Assignment,
    /// Client balance after the hire.
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub purchase: Purchase,
    /// Buyer balance after the purchase.
    pub balance: i64,
}

/// Purchase id used when the client does not send one: stable per buyer and
/// asset, so a retried request lands on the same ledger key.
pub fn default_purchase_id(buyer_id: Uuid, asset_id: Uuid) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", buyer_id, asset_id).as_bytes(),
    )
}

#[derive(Clone)]
pub struct MarketplaceService {
    store: Arc<dyn MarketplaceStore>,
    ledger: CreditLedger,
    platform_user_id: Uuid,
}

impl MarketplaceService {
    pub fn new(store: Arc<dyn MarketplaceStore>, ledger: CreditLedger, platform_user_id: Uuid) -> Self {
        Self {
            store,
            ledger,
            platform_user_id,
        }
    }

    pub fn platform_user_id(&self) -> Uuid {
        self.platform_user_id
    }

    /// Fund an assignment from the client's wallet and start it.
    pub async fn hire(
        &self,
        buyer_id: Uuid,
        assignment_id: Uuid,
    ) -> Result<HireReceipt, MarketplaceError> {
        let assignment = self
            .store
            .find_assignment(assignment_id)
            .await?
            .ok_or(MarketplaceError::AssignmentNotFound(assignment_id))?;

        if assignment.client_id != buyer_id {
            return Err(MarketplaceError::Forbidden(
                "only the assignment's client can hire for it",
            ));
        }
        if assignment.specialist_id == buyer_id {
            return Err(MarketplaceError::Forbidden("cannot hire yourself"));
        }
        if assignment.status != AssignmentStatus::Pending {
            return Err(MarketplaceError::AssignmentNotPending {
                assignment_id,
                current: assignment.status,
            });
        }

        let key = assignment_key(assignment_id);
        if !self.ledger.has_entry(buyer_id, &key).await? {
            self.ensure_funds(buyer_id, assignment.price).await?;
        }

        let transfer = self
            .ledger
            .transfer(&TransferPlan::hire(
                buyer_id,
                assignment.specialist_id,
                assignment.price,
                assignment_id,
            ))
            .await?;
        if !transfer.is_applied() {
            warn!(assignment_id = %assignment_id, "hire transfer already applied, finishing assignment");
        }

        let assignment = self.store.start_assignment(assignment_id).await?;
        let balance = self.ledger.wallet(buyer_id).await?.balance;

        info!(
            assignment_id = %assignment_id,
            user_id = %buyer_id,
            price = assignment.price,
            balance,
            "assignment hired"
        );
        Ok(HireReceipt {
            assignment,
            balance,
        })
    }

    /// License an asset: the buyer pays the gross, the creator receives the
    /// floor of 80% and the platform wallet the rest.
    pub async fn purchase(
        &self,
        buyer_id: Uuid,
        asset_id: Uuid,
        purchase_id: Option<Uuid>,
    ) -> Result<PurchaseReceipt, MarketplaceError> {
        let asset = self
            .store
            .find_asset(asset_id)
            .await?
            .ok_or(MarketplaceError::AssetNotFound(asset_id))?;

        if asset.owner_id == buyer_id {
            return Err(MarketplaceError::Forbidden("cannot purchase your own asset"));
        }
        if buyer_id == self.platform_user_id {
            return Err(MarketplaceError::Forbidden(
                "the platform wallet cannot purchase assets",
            ));
        }
        if self
            .store
            .find_completed_purchase(buyer_id, asset_id)
            .await?
            .is_some()
        {
            return Err(MarketplaceError::AlreadyPurchased(asset_id));
        }

        let purchase_id = purchase_id.unwrap_or_else(|| default_purchase_id(buyer_id, asset_id));
        if let Some(existing) = self.store.find_purchase(purchase_id).await? {
            if existing.buyer_id != buyer_id || existing.asset_id != asset_id {
                return Err(MarketplaceError::PurchaseIdConflict(purchase_id));
            }
        }

        let key = purchase_key(purchase_id);
        if !self.ledger.has_entry(buyer_id, &key).await? {
            self.ensure_funds(buyer_id, asset.price).await?;
        }

        let transfer = self
            .ledger
            .transfer(&TransferPlan::purchase(
                buyer_id,
                asset.owner_id,
                self.platform_user_id,
                asset.price,
                asset_id,
                purchase_id,
            ))
            .await?;
        if !transfer.is_applied() {
            warn!(purchase_id = %purchase_id, "purchase transfer already applied, recording purchase");
        }

        let split = split_purchase(asset.price);
        let purchase = self
            .store
            .record_purchase(NewPurchase {
                id: purchase_id,
                buyer_id,
                asset_id,
                price: asset.price,
                creator_cut: split.creator_cut,
                platform_cut: split.platform_cut,
            })
            .await?;
        let balance = self.ledger.wallet(buyer_id).await?.balance;

        info!(
            purchase_id = %purchase_id,
            asset_id = %asset_id,
            user_id = %buyer_id,
            price = asset.price,
            creator_cut = split.creator_cut,
            platform_cut = split.platform_cut,
            "asset purchased"
        );
        Ok(PurchaseReceipt { purchase, balance })
    }

    async fn ensure_funds(&self, user_id: Uuid, required: i64) -> Result<(), MarketplaceError> {
        let available = self.ledger.wallet(user_id).await?.balance;
        if available < required {
            info!(user_id = %user_id, available, required, "insufficient credits");
            return Err(MarketplaceError::InsufficientCredits {
                available,
                required,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::ledger::LedgerStore;

    fn service(store: &Arc<InMemoryStore>, platform: Uuid) -> MarketplaceService {
        let ledger = CreditLedger::new(store.clone() as Arc<dyn LedgerStore>);
        MarketplaceService::new(store.clone(), ledger, platform)
    }

    async fn fund(store: &Arc<InMemoryStore>, user: Uuid, credits: i64) {
        CreditLedger::new(store.clone() as Arc<dyn LedgerStore>)
            .top_up(user, credits, &format!("pay-{}", user), serde_json::json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hire_with_too_few_credits_changes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let client = Uuid::new_v4();
        let assignment = store.insert_assignment(client, Uuid::new_v4(), 50).await;
        fund(&store, client, 30).await;

        let err = service(&store, Uuid::nil())
            .hire(client, assignment.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarketplaceError::InsufficientCredits {
                available: 30,
                required: 50
            }
        ));
        assert_eq!(store.entry_count().await, 1);
        let unchanged = store.find_assignment(assignment.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, AssignmentStatus::Pending);
    }

    #[tokio::test]
    async fn hire_moves_price_to_specialist() {
        let store = Arc::new(InMemoryStore::new());
        let client = Uuid::new_v4();
        let specialist = Uuid::new_v4();
        let assignment = store.insert_assignment(client, specialist, 40).await;
        fund(&store, client, 100).await;

        let receipt = service(&store, Uuid::nil())
            .hire(client, assignment.id)
            .await
            .unwrap();
        assert_eq!(receipt.balance, 60);
        assert_eq!(receipt.assignment.status, AssignmentStatus::InProgress);
        assert_eq!(store.ledger_sum(specialist).await, 40);
    }

    #[tokio::test]
    async fn only_the_client_may_hire() {
        let store = Arc::new(InMemoryStore::new());
        let assignment = store
            .insert_assignment(Uuid::new_v4(), Uuid::new_v4(), 10)
            .await;
        let err = service(&store, Uuid::nil())
            .hire(Uuid::new_v4(), assignment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn purchase_splits_between_creator_and_platform() {
        let store = Arc::new(InMemoryStore::new());
        let platform = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let asset = store.insert_asset(creator, "harbour at dawn", 99).await;
        fund(&store, buyer, 100).await;

        let receipt = service(&store, platform)
            .purchase(buyer, asset.id, None)
            .await
            .unwrap();
        assert_eq!(receipt.balance, 1);
        assert_eq!(receipt.purchase.creator_cut, 79);
        assert_eq!(receipt.purchase.platform_cut, 20);
        assert_eq!(store.ledger_sum(creator).await, 79);
        assert_eq!(store.ledger_sum(platform).await, 20);
    }

    #[tokio::test]
    async fn second_purchase_of_same_asset_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let buyer = Uuid::new_v4();
        let asset = store.insert_asset(Uuid::new_v4(), "kelp", 10).await;
        fund(&store, buyer, 50).await;
        let svc = service(&store, Uuid::new_v4());

        svc.purchase(buyer, asset.id, None).await.unwrap();
        let err = svc.purchase(buyer, asset.id, None).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::AlreadyPurchased(_)));
        assert_eq!(store.ledger_sum(buyer).await, 40);
    }

    #[tokio::test]
    async fn interrupted_purchase_completes_without_second_debit() {
        let store = Arc::new(InMemoryStore::new());
        let platform = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let asset = store.insert_asset(creator, "fog", 20).await;
        fund(&store, buyer, 20).await;

        // Transfer landed, purchase row never written.
        let purchase_id = default_purchase_id(buyer, asset.id);
        CreditLedger::new(store.clone() as Arc<dyn LedgerStore>)
            .transfer(&TransferPlan::purchase(
                buyer, creator, platform, 20, asset.id, purchase_id,
            ))
            .await
            .unwrap();

        let receipt = service(&store, platform)
            .purchase(buyer, asset.id, None)
            .await
            .unwrap();
        assert_eq!(receipt.purchase.id, purchase_id);
        assert_eq!(receipt.balance, 0);
        assert_eq!(store.ledger_sum(creator).await, 16);
    }

    #[tokio::test]
    async fn buying_own_asset_is_forbidden() {
        let store = Arc::new(InMemoryStore::new());
        let owner = Uuid::new_v4();
        let asset = store.insert_asset(owner, "self portrait", 5).await;
        let err = service(&store, Uuid::nil())
            .purchase(owner, asset.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Forbidden(_)));
    }
}
