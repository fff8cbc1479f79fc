//! Payment, reconciliation and marketplace services.

pub mod marketplace;
pub mod payment_state;
pub mod reconciler;

pub use marketplace::{HireReceipt, MarketplaceError, MarketplaceService, PurchaseReceipt};
pub use payment_state::{InitiateOutcome, InitiatePayment, PaymentService, PaymentView};
pub use reconciler::{
    Channel, NotificationReconciler, ReconcileOutcome, Reconciled, ReconcilerError, Verdict,
    WebhookAck,
};
