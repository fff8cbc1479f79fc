use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::{api_error, auth::AuthUser, AppState};
use crate::error::AppError;
use crate::ledger::{LedgerEntry, Wallet};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<LedgerEntry>,
    pub count: usize,
}

/// GET /api/wallet
pub async fn get_wallet(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
) -> Result<Json<Wallet>, AppError> {
    let wallet = state
        .ledger
        .wallet(user_id)
        .await
        .map_err(|e| api_error(e, &headers))?;
    Ok(Json(wallet))
}

/// GET /api/wallet/transactions?limit=
pub async fn get_transactions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<TransactionsResponse>, AppError> {
    let transactions = state
        .ledger
        .recent_entries(user_id, query.limit)
        .await
        .map_err(|e| api_error(e, &headers))?;
    Ok(Json(TransactionsResponse {
        count: transactions.len(),
        transactions,
    }))
}
