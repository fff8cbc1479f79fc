//! HTTP surface.

pub mod auth;
pub mod marketplace;
pub mod payments;
pub mod threeds;
pub mod wallet;
pub mod webhooks;

use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::error::AppError;
use crate::health::{self, HealthChecker};
use crate::ledger::CreditLedger;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::{MarketplaceService, NotificationReconciler, PaymentService};

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub reconciler: Arc<NotificationReconciler>,
    pub ledger: CreditLedger,
    pub marketplace: MarketplaceService,
    pub health_checker: HealthChecker,
}

/// All routes, without the request-id and logging layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .route("/api/payments/initiate", post(payments::initiate_payment))
        .route(
            "/api/payments/{invoice_id}/status",
            get(payments::payment_status),
        )
        .route("/api/payments/3ds/complete", post(threeds::complete_challenge))
        .route(
            "/api/payments/3ds/fingerprint",
            get(threeds::fingerprint_status).post(threeds::fingerprint_complete),
        )
        .route("/webhooks/gateway", post(webhooks::gateway_webhook))
        .route("/api/wallet", get(wallet::get_wallet))
        .route("/api/wallet/transactions", get(wallet::get_transactions))
        .route("/api/assignments/{assignment_id}/hire", post(marketplace::hire))
        .route("/api/assets/{asset_id}/purchase", post(marketplace::purchase))
        .with_state(state)
}

/// Convert a layer error and tag it with the caller's request id.
pub(crate) fn api_error(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id),
        None => err,
    }
}
