use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::{api_error, auth::AuthUser, AppState};
use crate::error::AppError;
use crate::payments::card::CardDetails;
use crate::payments::types::{CustomerContact, Money};
use crate::services::{InitiatePayment, PaymentView};

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub credits: i64,
    pub amount_minor: i64,
    pub currency: String,
    pub card: CardDetails,
    #[serde(default)]
    pub customer: CustomerContact,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST /api/payments/initiate
///
/// Answers with the client view plus the invoice id to poll.
pub async fn initiate_payment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state
        .payments
        .initiate(InitiatePayment {
            user_id,
            credits: payload.credits,
            amount: Money {
                amount_minor: payload.amount_minor,
                currency: payload.currency,
            },
            card: payload.card,
            customer: payload.customer,
            description: payload.description,
        })
        .await
        .map_err(|e| api_error(e, &headers))?;

    info!(
        invoice_id = %outcome.invoice.id,
        user_id = %user_id,
        status = outcome.view.status(),
        "payment initiated"
    );

    let mut body = outcome.view.to_json();
    if let Some(map) = body.as_object_mut() {
        map.insert(
            "invoice_id".to_string(),
            serde_json::Value::from(outcome.invoice.id.to_string()),
        );
    }
    Ok(Json(body))
}

/// GET /api/payments/{invoice_id}/status
pub async fn payment_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(invoice_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<PaymentView>, AppError> {
    let view = state
        .reconciler
        .poll_status(user_id, invoice_id)
        .await
        .map_err(|e| api_error(e, &headers))?;
    Ok(Json(view))
}
