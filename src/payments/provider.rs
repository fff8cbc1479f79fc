use crate::payments::error::PaymentResult;
use crate::payments::types::{AuthorizationRequest, AuthorizationResponse, StatusResponse};
use async_trait::async_trait;

/// Outbound side of the acquiring gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submit a card authorization.
    async fn authorize(&self, request: AuthorizationRequest)
        -> PaymentResult<AuthorizationResponse>;

    /// Poll the current state of a payment the gateway already accepted.
    async fn get_payment_status(&self, payment_id: &str) -> PaymentResult<StatusResponse>;

    fn name(&self) -> &'static str;

    fn supported_currencies(&self) -> Vec<String>;

    fn supports_currency(&self, currency: &str) -> bool {
        let wanted = currency.trim().to_uppercase();
        self.supported_currencies()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&wanted))
    }
}
