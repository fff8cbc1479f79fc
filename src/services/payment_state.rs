//! Payment state machine: starts card payments and renders invoice state
//! for clients.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::invoice_repository::{Invoice, InvoiceStatus, InvoiceStore, NewInvoice};
use crate::payments::card::{mask_card_number, CardDetails};
use crate::payments::challenge::ChallengePhase;
use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    AuthorizationOutcome, AuthorizationRequest, CustomerContact, Money,
};
use crate::services::reconciler::{Channel, NotificationReconciler, ReconcilerError, Verdict};

/// What a client sees for an invoice.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentView {
    Success { balance: i64 },
    Decline { message: String },
    ThreeDsRequired {
        /// Absent for a basic ACS redirect, which has a single client phase.
        phase: Option<ChallengePhase>,
        fields: Map<String, JsonValue>,
    },
    Pending,
}

impl PaymentView {
    /// `balance` is only shown for paid invoices.
    pub fn for_invoice(invoice: &Invoice, balance: i64) -> Self {
        match invoice.status {
            InvoiceStatus::Paid => PaymentView::Success { balance },
            InvoiceStatus::Failed => PaymentView::Decline {
                message: invoice
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "payment failed".to_string()),
            },
            InvoiceStatus::Pending => match (&invoice.challenge_state, invoice.outstanding_phase()) {
                (Some(challenge), Some(phase)) if phase != ChallengePhase::AwaitingVerdict => {
                    PaymentView::ThreeDsRequired {
                        phase: challenge.reports_phase().then_some(phase),
                        fields: if phase.requires_client_action() {
                            challenge.client_fields()
                        } else {
                            Map::new()
                        },
                    }
                }
                _ => PaymentView::Pending,
            },
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            PaymentView::Success { .. } => "success",
            PaymentView::Decline { .. } => "decline",
            PaymentView::ThreeDsRequired { .. } => "3ds_required",
            PaymentView::Pending => "pending",
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let mut body = Map::new();
        body.insert("status".to_string(), JsonValue::from(self.status()));
        match self {
            PaymentView::Success { balance } => {
                body.insert("balance".to_string(), JsonValue::from(*balance));
            }
            PaymentView::Decline { message } => {
                body.insert("message".to_string(), JsonValue::from(message.as_str()));
            }
            PaymentView::ThreeDsRequired { phase, fields } => {
                if let Some(phase) = phase {
                    body.insert("phase".to_string(), JsonValue::from(phase.as_str()));
                }
                for (key, value) in fields {
                    body.insert(key.clone(), value.clone());
                }
            }
            PaymentView::Pending => {}
        }
        JsonValue::Object(body)
    }
}

impl Serialize for PaymentView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// The 3DS return URL tagged with the invoice, so the return can be matched
/// even when the gateway echoes nothing useful back.
fn return_url_for(base: &str, invoice_id: Uuid) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}invoice_id={}", base, separator, invoice_id)
}

/// A request to buy `credits` for `amount` with a card.
#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub user_id: Uuid,
    pub credits: i64,
    pub amount: Money,
    pub card: CardDetails,
    pub customer: CustomerContact,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub invoice: Invoice,
    pub view: PaymentView,
}

pub struct PaymentService {
    invoices: Arc<dyn InvoiceStore>,
    gateway: Arc<dyn PaymentGateway>,
    reconciler: Arc<NotificationReconciler>,
    return_url: String,
}

impl PaymentService {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        gateway: Arc<dyn PaymentGateway>,
        reconciler: Arc<NotificationReconciler>,
        return_url: String,
    ) -> Self {
        Self {
            invoices,
            gateway,
            reconciler,
            return_url,
        }
    }

    fn validate(&self, request: &InitiatePayment) -> Result<(), PaymentError> {
        if request.credits <= 0 {
            return Err(PaymentError::validation(
                "credits must be greater than zero",
                "credits",
            ));
        }
        request.amount.validate_positive("amount_minor")?;
        if !self.gateway.supports_currency(&request.amount.currency) {
            return Err(PaymentError::validation(
                format!(
                    "currency {} is not supported by the gateway",
                    request.amount.currency.to_uppercase()
                ),
                "currency",
            ));
        }
        request.card.validate()?;
        Ok(())
    }

    /// Validate, record a `PENDING` invoice and submit the card to the
    /// gateway. Nothing is written when validation fails.
    pub async fn initiate(
        &self,
        request: InitiatePayment,
    ) -> Result<InitiateOutcome, ReconcilerError> {
        self.validate(&request)?;

        let invoice = self
            .invoices
            .create(NewInvoice {
                user_id: request.user_id,
                credits: request.credits,
                amount_minor: request.amount.amount_minor,
                currency: request.amount.currency.to_uppercase(),
            })
            .await?;

        info!(
            invoice_id = %invoice.id,
            user_id = %invoice.user_id,
            credits = invoice.credits,
            amount_minor = invoice.amount_minor,
            card = %mask_card_number(&request.card.number),
            "initiating card payment"
        );

        let authorization = AuthorizationRequest {
            order_reference: invoice.id.to_string(),
            amount: request.amount,
            card: request.card,
            customer: request.customer,
            return_url: Some(return_url_for(&self.return_url, invoice.id)),
            description: request
                .description
                .or_else(|| Some(format!("{} credits", invoice.credits))),
        };

        let response = match self.gateway.authorize(authorization).await {
            Ok(response) => response,
            Err(e) => {
                // No payment id exists, so nothing could ever resolve this invoice.
                warn!(invoice_id = %invoice.id, error = %e, "authorization failed");
                self.invoices
                    .mark_failed(invoice.id, &format!("authorization failed: {}", e))
                    .await?;
                return Err(match e {
                    PaymentError::ValidationError { .. } => ReconcilerError::Payment(e),
                    other => ReconcilerError::GatewayUnavailable(other.to_string()),
                });
            }
        };

        let invoice = match (response.outcome, response.payment_id) {
            (AuthorizationOutcome::Declined { message, .. }, None) => {
                self.invoices.mark_failed(invoice.id, &message).await?
            }
            (AuthorizationOutcome::Declined { message, .. }, Some(payment_id)) => {
                self.invoices
                    .attach_payment(invoice.id, &payment_id, None)
                    .await?;
                self.reconciler
                    .apply_verdict(
                        &payment_id,
                        Verdict::Declined { reason: message },
                        Channel::Authorization,
                    )
                    .await?
                    .invoice
            }
            (AuthorizationOutcome::Success, Some(payment_id)) => {
                self.invoices
                    .attach_payment(invoice.id, &payment_id, None)
                    .await?;
                self.reconciler
                    .apply_verdict(&payment_id, Verdict::Success, Channel::Authorization)
                    .await?
                    .invoice
            }
            (AuthorizationOutcome::ThreeDsRequired(challenge), Some(payment_id)) => {
                info!(
                    invoice_id = %invoice.id,
                    payment_id = %payment_id,
                    challenge = challenge.kind(),
                    "3-D Secure required"
                );
                self.invoices
                    .attach_payment(invoice.id, &payment_id, Some(&challenge))
                    .await?
            }
            (AuthorizationOutcome::Pending, Some(payment_id)) => {
                self.invoices
                    .attach_payment(invoice.id, &payment_id, None)
                    .await?
            }
            (_, None) => {
                self.invoices
                    .mark_failed(invoice.id, "gateway response without payment id")
                    .await?;
                return Err(ReconcilerError::GatewayUnavailable(
                    "gateway response without payment id".to_string(),
                ));
            }
        };

        let view = self.reconciler.view(&invoice).await?;
        Ok(InitiateOutcome { invoice, view })
    }
}
