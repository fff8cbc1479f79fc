use crate::payments::card::CardDetails;
use crate::payments::challenge::ChallengeState;
use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Monetary amount in minor units (cents) with an ISO-4217 code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: String,
}

impl Money {
    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount_minor <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::ValidationError {
                message: "currency must be a three-letter ISO code".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerContact {
    pub email: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Merchant-side reference; the invoice id.
    pub order_reference: String,
    pub amount: Money,
    pub card: CardDetails,
    pub customer: CustomerContact,
    pub return_url: Option<String>,
    pub description: Option<String>,
}

/// What the gateway decided on a fresh authorization.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationOutcome {
    Success,
    ThreeDsRequired(ChallengeState),
    /// Accepted without a verdict or usable challenge data yet.
    Pending,
    Declined {
        message: String,
        provider_code: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct AuthorizationResponse {
    /// Gateway-assigned identifier; missing when the attempt was rejected outright.
    pub payment_id: Option<String>,
    pub outcome: AuthorizationOutcome,
    pub provider_data: Option<JsonValue>,
}

/// Result of polling an existing payment.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayStatus {
    Pending,
    Success,
    Declined { message: String },
    /// The gateway now has (new) challenge data for the cardholder.
    ChallengeReady(ChallengeState),
}

#[derive(Debug, Clone)]
pub struct StatusResponse {
    pub payment_id: String,
    pub status: GatewayStatus,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

/// Payment status as reported by an inbound notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Success,
    Failed,
    Unknown,
}

impl PaymentState {
    pub fn from_provider_str(raw: &str) -> PaymentState {
        match raw.trim().to_lowercase().as_str() {
            "success" | "succeeded" | "successful" | "paid" | "approved" | "completed"
            | "captured" | "payment.success" | "payment.succeeded" | "charge.success" => {
                PaymentState::Success
            }
            "declined" | "failed" | "failure" | "error" | "rejected" | "cancelled"
            | "canceled" | "payment.failed" | "payment.declined" | "charge.failed" => {
                PaymentState::Failed
            }
            "pending" | "processing" | "created" | "3ds_required" | "requires_action" => {
                PaymentState::Pending
            }
            _ => PaymentState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub payment_id: Option<String>,
    pub status: PaymentState,
    pub message: Option<String>,
    pub payload: JsonValue,
    pub received_at: String,
}
