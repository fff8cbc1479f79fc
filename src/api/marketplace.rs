use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{api_error, auth::AuthUser, AppState};
use crate::error::AppError;
use crate::services::{HireReceipt, PurchaseReceipt};

/// POST /api/assignments/{assignment_id}/hire
pub async fn hire(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(assignment_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<HireReceipt>, AppError> {
    let receipt = state
        .marketplace
        .hire(user_id, assignment_id)
        .await
        .map_err(|e| api_error(e, &headers))?;
    Ok(Json(receipt))
}

#[derive(Debug, Default, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default)]
    pub purchase_id: Option<Uuid>,
}

/// POST /api/assets/{asset_id}/purchase
///
/// The body is optional; a client that wants its own idempotency key sends
/// `{"purchase_id": "<uuid>"}`.
pub async fn purchase(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(asset_id): Path<Uuid>,
    headers: HeaderMap,
    body: Option<Json<PurchaseRequest>>,
) -> Result<Json<PurchaseReceipt>, AppError> {
    let purchase_id = body.and_then(|Json(req)| req.purchase_id);
    let receipt = state
        .marketplace
        .purchase(user_id, asset_id, purchase_id)
        .await
        .map_err(|e| api_error(e, &headers))?;
    Ok(Json(receipt))
}
