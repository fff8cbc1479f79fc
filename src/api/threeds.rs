//! 3-D Secure callbacks: the fingerprinting sub-notify and the challenge
//! return. Both accept the payment reference from the query string, a JSON
//! body or a form post, since issuers differ in how they come back.

use axum::{
    extract::{FromRequest, Query, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::api::{api_error, AppState};
use crate::error::AppError;
use crate::services::reconciler::FingerprintStatus;

#[derive(Debug, Default, Deserialize)]
pub struct ReferenceParams {
    #[serde(default, alias = "paymentId")]
    pub payment_id: Option<String>,
    #[serde(default, alias = "invoiceId")]
    pub invoice_id: Option<String>,
    #[serde(default, alias = "MD")]
    pub md: Option<String>,
    #[serde(default, rename = "threeDSSessionData")]
    pub session_data: Option<String>,
}

impl ReferenceParams {
    fn reference(&self) -> Option<&str> {
        [
            &self.payment_id,
            &self.invoice_id,
            &self.md,
            &self.session_data,
        ]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
    }

    fn or(self, other: ReferenceParams) -> ReferenceParams {
        ReferenceParams {
            payment_id: self.payment_id.or(other.payment_id),
            invoice_id: self.invoice_id.or(other.invoice_id),
            md: self.md.or(other.md),
            session_data: self.session_data.or(other.session_data),
        }
    }
}

/// Reference fields from the body, by content type. An unreadable body
/// yields no fields.
async fn body_params(request: Request) -> ReferenceParams {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        match Json::<ReferenceParams>::from_request(request, &()).await {
            Ok(Json(params)) => params,
            Err(e) => {
                warn!(error = %e, "unreadable JSON 3DS callback body");
                ReferenceParams::default()
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        match Form::<ReferenceParams>::from_request(request, &()).await {
            Ok(Form(params)) => params,
            Err(e) => {
                warn!(error = %e, "unreadable form 3DS callback body");
                ReferenceParams::default()
            }
        }
    } else {
        ReferenceParams::default()
    }
}

/// POST /api/payments/3ds/complete
pub async fn complete_challenge(
    State(state): State<AppState>,
    Query(query): Query<ReferenceParams>,
    request: Request,
) -> Result<Json<serde_json::Value>, AppError> {
    let headers = request.headers().clone();
    let params = query.or(body_params(request).await);
    let Some(reference) = params.reference().map(str::to_string) else {
        info!("challenge return without a payment reference");
        return Ok(Json(json!({ "status": "ignored" })));
    };

    let view = state
        .reconciler
        .complete_challenge(&reference)
        .await
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(match view {
        Some(view) => view.to_json(),
        None => json!({ "status": "not_found" }),
    }))
}

/// POST /api/payments/3ds/fingerprint
pub async fn fingerprint_complete(
    State(state): State<AppState>,
    Query(query): Query<ReferenceParams>,
    request: Request,
) -> Result<Json<FingerprintStatus>, AppError> {
    let headers = request.headers().clone();
    let params = query.or(body_params(request).await);
    let reference = params.reference().unwrap_or_default().to_string();

    let status = state
        .reconciler
        .mark_fingerprint_complete(&reference)
        .await
        .map_err(|e| api_error(e, &headers))?;
    Ok(Json(status))
}

/// GET /api/payments/3ds/fingerprint
pub async fn fingerprint_status(
    State(state): State<AppState>,
    Query(query): Query<ReferenceParams>,
    headers: HeaderMap,
) -> Result<Json<FingerprintStatus>, AppError> {
    let reference = query.reference().unwrap_or_default().to_string();
    let status = state
        .reconciler
        .fingerprint_status(&reference)
        .await
        .map_err(|e| api_error(e, &headers))?;
    Ok(Json(status))
}
