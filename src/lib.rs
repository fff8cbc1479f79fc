//! Card payment authorization and credit ledger service.
//!
//! Card payments buy credits; the credits pay for hiring specialists and
//! licensing assets. Every balance change goes through the ledger in
//! [`ledger`], and every gateway signal goes through the reconciler in
//! [`services::reconciler`].

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};

/// The full application: routes plus request-id and request logging layers.
pub fn app(state: api::AppState) -> Router {
    api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}
