use crate::payments::challenge::ChallengeState;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    AuthorizationOutcome, AuthorizationRequest, AuthorizationResponse, GatewayStatus,
    StatusResponse,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AcquirerConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub currencies: Vec<String>,
}

impl Default for AcquirerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.gateway.example/v1".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            currencies: vec!["USD".to_string(), "EUR".to_string(), "GBP".to_string()],
        }
    }
}

/// HTTP client for the card acquiring gateway.
pub struct AcquirerGateway {
    config: AcquirerConfig,
    http: PaymentHttpClient,
}

impl AcquirerGateway {
    pub fn new(config: AcquirerConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PaymentGateway for AcquirerGateway {
    async fn authorize(
        &self,
        request: AuthorizationRequest,
    ) -> PaymentResult<AuthorizationResponse> {
        request.amount.validate_positive("amount")?;
        let expiry = request.card.validate()?;

        let payload = serde_json::json!({
            "order_reference": request.order_reference,
            "amount": request.amount.amount_minor,
            "currency": request.amount.currency.to_uppercase(),
            "card": {
                "number": request.card.normalized_number(),
                "expiry_month": expiry.month,
                "expiry_year": expiry.year,
                "cvv": request.card.cvv.trim(),
                "holder_name": request.card.holder_name,
            },
            "customer": {
                "email": request.customer.email,
                "ip": request.customer.ip_address,
            },
            "return_url": request.return_url,
            "description": request.description,
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/payments"),
                Some(&self.config.api_key),
                Some(&payload),
                false,
            )
            .await?;

        let response = interpret_authorization(raw)?;
        info!(
            order_reference = %request.order_reference,
            payment_id = response.payment_id.as_deref().unwrap_or("-"),
            "gateway authorization answered"
        );
        Ok(response)
    }

    async fn get_payment_status(&self, payment_id: &str) -> PaymentResult<StatusResponse> {
        if payment_id.trim().is_empty() {
            return Err(PaymentError::validation(
                "payment_id is required",
                "payment_id",
            ));
        }
        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/payments/{}", payment_id.trim())),
                Some(&self.config.api_key),
                None,
                true,
            )
            .await?;
        Ok(interpret_status(payment_id, raw))
    }

    fn name(&self) -> &'static str {
        "acquirer"
    }

    fn supported_currencies(&self) -> Vec<String> {
        self.config.currencies.clone()
    }
}

fn string_field(body: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| body.get(*k))
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn malformed(message: impl Into<String>) -> PaymentError {
    PaymentError::ProviderError {
        provider: "acquirer".to_string(),
        message: message.into(),
        provider_code: None,
        retryable: false,
    }
}

/// Map an authorization response body onto an [`AuthorizationOutcome`].
pub fn interpret_authorization(body: JsonValue) -> PaymentResult<AuthorizationResponse> {
    let payment_id = string_field(&body, &["payment_id", "id"]);
    let status = string_field(&body, &["status"])
        .ok_or_else(|| malformed("authorization response has no status"))?
        .to_lowercase();

    let outcome = match status.as_str() {
        "success" | "approved" | "authorized" | "captured" => AuthorizationOutcome::Success,
        "3ds_required" | "requires_action" | "challenge_required" => {
            match ChallengeState::from_gateway(&body) {
                Some(challenge) => AuthorizationOutcome::ThreeDsRequired(challenge),
                None => {
                    warn!(
                        payment_id = payment_id.as_deref().unwrap_or("-"),
                        "3ds_required without a recognised challenge shape"
                    );
                    AuthorizationOutcome::Pending
                }
            }
        }
        "pending" | "processing" => AuthorizationOutcome::Pending,
        "declined" | "decline" | "failed" | "error" | "rejected" => AuthorizationOutcome::Declined {
            message: string_field(&body, &["message", "decline_reason", "error"])
                .unwrap_or_else(|| "payment declined".to_string()),
            provider_code: string_field(&body, &["code", "decline_code"]),
        },
        other => return Err(malformed(format!("unknown authorization status: {}", other))),
    };

    // Anything other than a decline has to be trackable later.
    if payment_id.is_none() && !matches!(outcome, AuthorizationOutcome::Declined { .. }) {
        return Err(malformed("authorization response has no payment_id"));
    }

    Ok(AuthorizationResponse {
        payment_id,
        outcome,
        provider_data: Some(body),
    })
}

/// Map a status-poll body onto a [`GatewayStatus`]. Unknown statuses are
/// treated as still pending.
pub fn interpret_status(payment_id: &str, body: JsonValue) -> StatusResponse {
    let status = string_field(&body, &["status"])
        .unwrap_or_default()
        .to_lowercase();

    let status = match status.as_str() {
        "success" | "approved" | "authorized" | "captured" | "paid" => GatewayStatus::Success,
        "declined" | "decline" | "failed" | "error" | "rejected" | "cancelled" => {
            GatewayStatus::Declined {
                message: string_field(&body, &["message", "decline_reason", "error"])
                    .unwrap_or_else(|| "payment declined".to_string()),
            }
        }
        "3ds_required" | "requires_action" | "challenge_required" => {
            match ChallengeState::from_gateway(&body) {
                Some(challenge) => GatewayStatus::ChallengeReady(challenge),
                None => GatewayStatus::Pending,
            }
        }
        "pending" | "processing" => GatewayStatus::Pending,
        other => {
            warn!(payment_id = %payment_id, status = %other, "unrecognised gateway status, treating as pending");
            GatewayStatus::Pending
        }
    };

    StatusResponse {
        payment_id: payment_id.to_string(),
        status,
        provider_data: Some(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn immediate_success_is_recognised() {
        let response =
            interpret_authorization(json!({"payment_id": "pay_1", "status": "success"})).unwrap();
        assert_eq!(response.outcome, AuthorizationOutcome::Success);
        assert_eq!(response.payment_id.as_deref(), Some("pay_1"));
    }

    #[test]
    fn each_challenge_shape_is_recognised() {
        let basic = interpret_authorization(json!({
            "id": "pay_2",
            "status": "3ds_required",
            "three_ds": {"acs_url": "https://acs", "pa_req": "p", "md": "m"}
        }))
        .unwrap();
        assert!(matches!(
            basic.outcome,
            AuthorizationOutcome::ThreeDsRequired(ChallengeState::AcsRedirect { .. })
        ));

        let extended = interpret_authorization(json!({
            "id": "pay_3",
            "status": "3ds_required",
            "three_ds": {"iframe_url": "https://gw/fp", "iframe_params": {"threeDSMethodData": "x"}}
        }))
        .unwrap();
        assert!(matches!(
            extended.outcome,
            AuthorizationOutcome::ThreeDsRequired(ChallengeState::ExtendedIframe { .. })
        ));

        let v2 = interpret_authorization(json!({
            "id": "pay_4",
            "status": "3ds_required",
            "three_ds": {"threeds2": {"acs_url": "https://acs/v2", "creq": "c"}}
        }))
        .unwrap();
        assert!(matches!(
            v2.outcome,
            AuthorizationOutcome::ThreeDsRequired(ChallengeState::ThreeDs2Challenge { .. })
        ));
    }

    #[test]
    fn decline_without_payment_id_is_accepted() {
        let response =
            interpret_authorization(json!({"status": "declined", "message": "insufficient funds"}))
                .unwrap();
        assert_eq!(
            response.outcome,
            AuthorizationOutcome::Declined {
                message: "insufficient funds".to_string(),
                provider_code: None
            }
        );
    }

    #[test]
    fn success_without_payment_id_is_malformed() {
        assert!(interpret_authorization(json!({"status": "success"})).is_err());
        assert!(interpret_authorization(json!({"payment_id": "p"})).is_err());
        assert!(interpret_authorization(json!({"payment_id": "p", "status": "weird"})).is_err());
    }

    #[test]
    fn unknown_poll_status_degrades_to_pending() {
        let response = interpret_status("pay_5", json!({"status": "on_hold"}));
        assert_eq!(response.status, GatewayStatus::Pending);
        let response = interpret_status("pay_5", json!({}));
        assert_eq!(response.status, GatewayStatus::Pending);
    }
}
