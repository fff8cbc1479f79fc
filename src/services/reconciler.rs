//! Notification reconciler.
//!
//! The authorization response, the gateway webhook, the client status poll
//! and the 3DS return all funnel into [`NotificationReconciler::apply_verdict`].
//! A success credits the ledger under the payment id before the invoice is
//! flipped, so the ledger decides and the invoice follows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::invoice_repository::{Invoice, InvoiceStatus, InvoiceStore};
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};
use crate::ledger::{CreditLedger, LedgerError};
use crate::payments::challenge::{ChallengePhase, ChallengeState};
use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentGateway;
use crate::payments::signature::WebhookVerifier;
use crate::payments::types::{GatewayStatus, PaymentState};
use crate::payments::webhook::parse_webhook_event;
use crate::services::payment_state::PaymentView;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

impl From<ReconcilerError> for AppError {
    fn from(err: ReconcilerError) -> Self {
        match err {
            ReconcilerError::InvoiceNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::InvoiceNotFound {
                    invoice_id: id.to_string(),
                }))
            }
            ReconcilerError::Payment(e) => e.into(),
            ReconcilerError::GatewayUnavailable(message) => {
                AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "gateway".to_string(),
                    message,
                    is_retryable: true,
                }))
            }
            ReconcilerError::Ledger(e) => e.into(),
            ReconcilerError::Storage(e) => e.into(),
        }
    }
}

/// Which inbound signal produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Authorization,
    Webhook,
    Poll,
    ChallengeReturn,
    Sweep,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Authorization => "authorization",
            Channel::Webhook => "webhook",
            Channel::Poll => "poll",
            Channel::ChallengeReturn => "challenge_return",
            Channel::Sweep => "sweep",
        }
    }
}

/// The gateway's opinion about a payment, whichever channel carried it.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Success,
    Declined { reason: String },
    ChallengeReady(ChallengeState),
    Pending,
}

impl From<GatewayStatus> for Verdict {
    fn from(status: GatewayStatus) -> Self {
        match status {
            GatewayStatus::Success => Verdict::Success,
            GatewayStatus::Declined { message } => Verdict::Declined { reason: message },
            GatewayStatus::ChallengeReady(challenge) => Verdict::ChallengeReady(challenge),
            GatewayStatus::Pending => Verdict::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Ledger credited and invoice paid by this call.
    Credited,
    /// Invoice was already in the state the verdict asks for.
    AlreadyProcessed,
    /// Ledger already held the credit; only the invoice was fixed up.
    Repaired,
    Failed,
    ChallengeUpdated,
    Pending,
    /// Verdict contradicts a terminal invoice and was dropped.
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Credited => "credited",
            ReconcileOutcome::AlreadyProcessed => "already_processed",
            ReconcileOutcome::Repaired => "repaired",
            ReconcileOutcome::Failed => "failed",
            ReconcileOutcome::ChallengeUpdated => "challenge_updated",
            ReconcileOutcome::Pending => "pending",
            ReconcileOutcome::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub outcome: ReconcileOutcome,
    pub invoice: Invoice,
}

/// Acknowledgement for a webhook delivery. The HTTP answer is always 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

impl WebhookAck {
    fn new(status: &'static str) -> Self {
        Self { status }
    }
}

/// State reported to the fingerprinting iframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintStatus {
    pub found: bool,
    pub fingerprint_complete: bool,
    pub phase: Option<ChallengePhase>,
    pub status: Option<InvoiceStatus>,
}

impl FingerprintStatus {
    fn not_found() -> Self {
        Self {
            found: false,
            fingerprint_complete: false,
            phase: None,
            status: None,
        }
    }

    fn of(invoice: &Invoice) -> Self {
        Self {
            found: true,
            fingerprint_complete: invoice.fingerprint_complete,
            phase: invoice.outstanding_phase(),
            status: Some(invoice.status),
        }
    }
}

pub struct NotificationReconciler {
    invoices: Arc<dyn InvoiceStore>,
    ledger: CreditLedger,
    gateway: Arc<dyn PaymentGateway>,
    verifier: WebhookVerifier,
}

impl NotificationReconciler {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        ledger: CreditLedger,
        gateway: Arc<dyn PaymentGateway>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            invoices,
            ledger,
            gateway,
            verifier,
        }
    }

    /// Client-facing view, with the wallet balance once paid.
    pub async fn view(&self, invoice: &Invoice) -> Result<PaymentView, ReconcilerError> {
        let balance = if invoice.status == InvoiceStatus::Paid {
            self.ledger.wallet(invoice.user_id).await?.balance
        } else {
            0
        };
        Ok(PaymentView::for_invoice(invoice, balance))
    }

    /// Single decision point for every channel.
    pub async fn apply_verdict(
        &self,
        payment_id: &str,
        verdict: Verdict,
        channel: Channel,
    ) -> Result<Reconciled, ReconcilerError> {
        let invoice = self
            .invoices
            .find_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| {
                ReconcilerError::Storage(DatabaseError::not_found("invoice", payment_id))
            })?;
        self.apply_to_invoice(invoice, verdict, channel).await
    }

    async fn apply_to_invoice(
        &self,
        invoice: Invoice,
        verdict: Verdict,
        channel: Channel,
    ) -> Result<Reconciled, ReconcilerError> {
        let Some(payment_id) = invoice.payment_id.clone() else {
            return Ok(Reconciled {
                outcome: ReconcileOutcome::Pending,
                invoice,
            });
        };

        let reconciled = match verdict {
            Verdict::Success => match invoice.status {
                InvoiceStatus::Paid => Reconciled {
                    outcome: ReconcileOutcome::AlreadyProcessed,
                    invoice,
                },
                InvoiceStatus::Failed => {
                    warn!(
                        invoice_id = %invoice.id,
                        payment_id = %payment_id,
                        channel = channel.as_str(),
                        "success reported for a failed invoice, ignoring"
                    );
                    Reconciled {
                        outcome: ReconcileOutcome::Ignored,
                        invoice,
                    }
                }
                InvoiceStatus::Pending => {
                    let transfer = self
                        .ledger
                        .top_up(
                            invoice.user_id,
                            invoice.credits,
                            &payment_id,
                            serde_json::json!({
                                "invoice_id": invoice.id,
                                "amount_minor": invoice.amount_minor,
                                "currency": invoice.currency,
                                "channel": channel.as_str(),
                            }),
                        )
                        .await?;
                    let invoice = self.invoices.mark_paid(invoice.id).await?;
                    if invoice.status != InvoiceStatus::Paid {
                        error!(
                            invoice_id = %invoice.id,
                            payment_id = %payment_id,
                            status = %invoice.status,
                            "ledger credited but invoice left terminal in another state"
                        );
                    }
                    Reconciled {
                        outcome: if transfer.is_applied() {
                            ReconcileOutcome::Credited
                        } else {
                            ReconcileOutcome::AlreadyProcessed
                        },
                        invoice,
                    }
                }
            },
            Verdict::Declined { reason } => {
                if invoice.is_terminal() {
                    Reconciled {
                        outcome: ReconcileOutcome::AlreadyProcessed,
                        invoice,
                    }
                } else if self.ledger.has_entry(invoice.user_id, &payment_id).await? {
                    warn!(
                        invoice_id = %invoice.id,
                        payment_id = %payment_id,
                        "decline reported but ledger holds the credit; marking paid"
                    );
                    Reconciled {
                        outcome: ReconcileOutcome::Repaired,
                        invoice: self.invoices.mark_paid(invoice.id).await?,
                    }
                } else {
                    Reconciled {
                        outcome: ReconcileOutcome::Failed,
                        invoice: self.invoices.mark_failed(invoice.id, &reason).await?,
                    }
                }
            }
            Verdict::ChallengeReady(challenge) => {
                if invoice.is_terminal() {
                    Reconciled {
                        outcome: ReconcileOutcome::Ignored,
                        invoice,
                    }
                } else {
                    let fingerprint = challenge.implies_fingerprint_complete();
                    let changed = invoice.challenge_state.as_ref() != Some(&challenge)
                        || (fingerprint && !invoice.fingerprint_complete);
                    if changed {
                        Reconciled {
                            outcome: ReconcileOutcome::ChallengeUpdated,
                            invoice: self
                                .invoices
                                .set_challenge(invoice.id, &challenge, fingerprint)
                                .await?,
                        }
                    } else {
                        Reconciled {
                            outcome: ReconcileOutcome::Pending,
                            invoice,
                        }
                    }
                }
            }
            Verdict::Pending => Reconciled {
                outcome: if invoice.is_terminal() {
                    ReconcileOutcome::AlreadyProcessed
                } else {
                    ReconcileOutcome::Pending
                },
                invoice,
            },
        };

        info!(
            invoice_id = %reconciled.invoice.id,
            payment_id = %payment_id,
            channel = channel.as_str(),
            outcome = reconciled.outcome.as_str(),
            status = %reconciled.invoice.status,
            "verdict applied"
        );
        Ok(reconciled)
    }

    /// Handle one webhook delivery. Never fails; the outcome is logged and
    /// returned for the acknowledgement body.
    pub async fn handle_webhook(&self, raw_body: &[u8], signature: Option<&str>) -> WebhookAck {
        let verification = self.verifier.verify(raw_body, signature);
        if !verification.valid {
            warn!(
                target: "security",
                reason = verification.reason.as_deref().unwrap_or("unknown"),
                scheme = self.verifier.scheme().as_str(),
                "webhook signature rejected"
            );
            return WebhookAck::new("unauthenticated");
        }

        let event = match parse_webhook_event(raw_body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "malformed webhook payload");
                return WebhookAck::new("malformed");
            }
        };

        let Some(payment_id) = event.payment_id.clone() else {
            warn!(event_type = %event.event_type, "webhook without payment id");
            return WebhookAck::new("missing_payment_id");
        };

        let invoice = match self.invoices.find_by_payment_id(&payment_id).await {
            Ok(Some(invoice)) => invoice,
            Ok(None) => {
                info!(payment_id = %payment_id, "webhook for unknown payment, dropping");
                return WebhookAck::new("unknown_payment");
            }
            Err(e) => {
                error!(payment_id = %payment_id, error = %e, "invoice lookup failed");
                return WebhookAck::new("error");
            }
        };

        let verdict = match event.status {
            PaymentState::Success => Verdict::Success,
            PaymentState::Failed => Verdict::Declined {
                reason: event
                    .message
                    .clone()
                    .unwrap_or_else(|| "payment declined".to_string()),
            },
            PaymentState::Pending => match ChallengeState::from_gateway(&event.payload) {
                Some(challenge) => Verdict::ChallengeReady(challenge),
                None => Verdict::Pending,
            },
            PaymentState::Unknown => {
                info!(
                    payment_id = %payment_id,
                    event_type = %event.event_type,
                    "webhook status not recognised, ignoring"
                );
                return WebhookAck::new("ignored");
            }
        };

        match self
            .apply_to_invoice(invoice, verdict, Channel::Webhook)
            .await
        {
            Ok(reconciled) => WebhookAck::new(match reconciled.outcome {
                ReconcileOutcome::Credited => "credited",
                ReconcileOutcome::Repaired => "repaired",
                ReconcileOutcome::AlreadyProcessed => "already_processed",
                ReconcileOutcome::Failed => "failed",
                ReconcileOutcome::ChallengeUpdated | ReconcileOutcome::Pending => "pending",
                ReconcileOutcome::Ignored => "ignored",
            }),
            Err(e) => {
                error!(payment_id = %payment_id, error = %e, "webhook processing failed");
                WebhookAck::new("error")
            }
        }
    }

    /// Client status poll for an invoice owned by `owner`.
    pub async fn poll_status(
        &self,
        owner: Uuid,
        invoice_id: Uuid,
    ) -> Result<PaymentView, ReconcilerError> {
        let invoice = self
            .invoices
            .find_by_id(invoice_id)
            .await?
            .filter(|invoice| invoice.user_id == owner)
            .ok_or(ReconcilerError::InvoiceNotFound(invoice_id))?;

        let (invoice, _) = self.refresh(invoice, Channel::Poll).await?;
        self.view(&invoice).await
    }

    /// Bring a pending invoice up to date: ledger first, then the gateway.
    /// Terminal invoices are returned untouched. The flag is false when the
    /// gateway could not be asked, so the pending state is only a guess.
    async fn refresh(
        &self,
        invoice: Invoice,
        channel: Channel,
    ) -> Result<(Invoice, bool), ReconcilerError> {
        if invoice.is_terminal() {
            return Ok((invoice, true));
        }
        let Some(payment_id) = invoice.payment_id.clone() else {
            return Ok((invoice, true));
        };

        if self.ledger.has_entry(invoice.user_id, &payment_id).await? {
            info!(invoice_id = %invoice.id, payment_id = %payment_id, "ledger already credited, repairing invoice");
            return Ok((self.invoices.mark_paid(invoice.id).await?, true));
        }

        match self.gateway.get_payment_status(&payment_id).await {
            Ok(status) => Ok((
                self.apply_to_invoice(invoice, status.status.into(), channel)
                    .await?
                    .invoice,
                true,
            )),
            Err(e) => {
                warn!(
                    invoice_id = %invoice.id,
                    payment_id = %payment_id,
                    error = %e,
                    "gateway status check failed, reporting current state"
                );
                Ok((invoice, false))
            }
        }
    }

    /// Resolve a 3DS callback reference: a gateway payment id, or the
    /// invoice id.
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Invoice>, ReconcilerError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Ok(None);
        }
        if let Some(invoice) = self.invoices.find_by_payment_id(reference).await? {
            return Ok(Some(invoice));
        }
        match Uuid::parse_str(reference) {
            Ok(id) => Ok(self.invoices.find_by_id(id).await?),
            Err(_) => Ok(None),
        }
    }

    /// Fingerprinting iframe finished. Unknown references are a no-op.
    pub async fn mark_fingerprint_complete(
        &self,
        reference: &str,
    ) -> Result<FingerprintStatus, ReconcilerError> {
        let Some(invoice) = self.find_by_reference(reference).await? else {
            info!(reference = %reference, "fingerprint notify for unknown invoice");
            return Ok(FingerprintStatus::not_found());
        };
        let invoice = self.invoices.mark_fingerprint_complete(invoice.id).await?;
        info!(invoice_id = %invoice.id, "3DS fingerprinting complete");
        Ok(FingerprintStatus::of(&invoice))
    }

    pub async fn fingerprint_status(
        &self,
        reference: &str,
    ) -> Result<FingerprintStatus, ReconcilerError> {
        Ok(match self.find_by_reference(reference).await? {
            Some(invoice) => FingerprintStatus::of(&invoice),
            None => FingerprintStatus::not_found(),
        })
    }

    /// Cardholder returned from the ACS or 3DS2 challenge. Marks the
    /// challenge handled and checks the gateway once.
    pub async fn complete_challenge(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentView>, ReconcilerError> {
        let Some(invoice) = self.find_by_reference(reference).await? else {
            info!(reference = %reference, "challenge return for unknown invoice");
            return Ok(None);
        };
        let invoice = self.invoices.mark_challenge_handled(invoice.id).await?;
        let (invoice, _) = self.refresh(invoice, Channel::ChallengeReturn).await?;
        Ok(Some(self.view(&invoice).await?))
    }

    /// Resolve an invoice that outlived the pending timeout: one last ledger
    /// and gateway check, then fail it. If the gateway cannot be reached the
    /// invoice stays PENDING for the next cycle.
    pub async fn expire(
        &self,
        invoice: Invoice,
        created_before: DateTime<Utc>,
    ) -> Result<Reconciled, ReconcilerError> {
        let (invoice, settled) = self.refresh(invoice, Channel::Sweep).await?;
        if !settled {
            warn!(invoice_id = %invoice.id, "gateway unreachable, deferring expiry");
            return Ok(Reconciled {
                outcome: ReconcileOutcome::Pending,
                invoice,
            });
        }
        if invoice.is_terminal() {
            return Ok(Reconciled {
                outcome: if invoice.status == InvoiceStatus::Paid {
                    ReconcileOutcome::Repaired
                } else {
                    ReconcileOutcome::Failed
                },
                invoice,
            });
        }

        let invoice = self
            .invoices
            .mark_failed(
                invoice.id,
                &format!("expired: no verdict before {}", created_before.to_rfc3339()),
            )
            .await?;
        Ok(Reconciled {
            outcome: ReconcileOutcome::Failed,
            invoice,
        })
    }
}
