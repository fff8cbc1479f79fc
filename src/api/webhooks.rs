use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Json};
use tracing::info;

use crate::api::AppState;
use crate::services::WebhookAck;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// POST /webhooks/gateway
///
/// Always 200: the gateway retries anything else, and a rejected or
/// unmatched delivery will not improve on retry. The outcome goes in the
/// body and the logs.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let ack = state.reconciler.handle_webhook(&body, signature).await;
    info!(status = ack.status, bytes = body.len(), "gateway webhook acknowledged");
    (StatusCode::OK, Json(ack))
}
