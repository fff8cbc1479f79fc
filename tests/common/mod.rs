//! Shared fixtures: a scripted gateway and a fully wired in-memory service.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use credit_ledger_engine::api::AppState;
use credit_ledger_engine::database::memory::InMemoryStore;
use credit_ledger_engine::health::HealthChecker;
use credit_ledger_engine::ledger::{CreditLedger, LedgerStore};
use credit_ledger_engine::payments::card::CardDetails;
use credit_ledger_engine::payments::error::{PaymentError, PaymentResult};
use credit_ledger_engine::payments::signature::{sign_payload, SignatureScheme, WebhookVerifier};
use credit_ledger_engine::payments::types::{
    AuthorizationOutcome, AuthorizationRequest, AuthorizationResponse, CustomerContact,
    GatewayStatus, Money, StatusResponse,
};
use credit_ledger_engine::payments::PaymentGateway;
use credit_ledger_engine::services::{
    InitiatePayment, MarketplaceService, NotificationReconciler, PaymentService,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const RETURN_URL: &str = "http://127.0.0.1:8000/api/payments/3ds/complete";

/// Gateway that answers from queued scripts. When the status queue runs
/// dry it keeps answering `Pending`.
#[derive(Default)]
pub struct ScriptedGateway {
    authorizations: Mutex<VecDeque<PaymentResult<AuthorizationResponse>>>,
    statuses: Mutex<VecDeque<PaymentResult<GatewayStatus>>>,
    pub authorize_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn push_authorization(&self, payment_id: Option<&str>, outcome: AuthorizationOutcome) {
        self.authorizations
            .lock()
            .unwrap()
            .push_back(Ok(AuthorizationResponse {
                payment_id: payment_id.map(str::to_string),
                outcome,
                provider_data: None,
            }));
    }

    pub fn push_authorization_error(&self, error: PaymentError) {
        self.authorizations.lock().unwrap().push_back(Err(error));
    }

    pub fn push_status(&self, status: GatewayStatus) {
        self.statuses.lock().unwrap().push_back(Ok(status));
    }

    pub fn push_status_error(&self, error: PaymentError) {
        self.statuses.lock().unwrap().push_back(Err(error));
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn authorize(&self, _request: AuthorizationRequest) -> PaymentResult<AuthorizationResponse> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        self.authorizations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(PaymentError::NetworkError {
                    message: "no scripted authorization".to_string(),
                })
            })
    }

    async fn get_payment_status(&self, payment_id: &str) -> PaymentResult<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(GatewayStatus::Pending));
        next.map(|status| StatusResponse {
            payment_id: payment_id.to_string(),
            status,
            provider_data: None,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supported_currencies(&self) -> Vec<String> {
        vec!["USD".to_string(), "EUR".to_string()]
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub ledger: CreditLedger,
    pub reconciler: Arc<NotificationReconciler>,
    pub payments: Arc<PaymentService>,
    pub marketplace: MarketplaceService,
    pub platform_user_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let ledger = CreditLedger::new(store.clone() as Arc<dyn LedgerStore>);
        let reconciler = Arc::new(NotificationReconciler::new(
            store.clone(),
            ledger.clone(),
            gateway.clone(),
            WebhookVerifier::new(Some(WEBHOOK_SECRET.to_string()), SignatureScheme::HmacSha256),
        ));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            gateway.clone(),
            reconciler.clone(),
            RETURN_URL.to_string(),
        ));
        let platform_user_id = Uuid::new_v4();
        let marketplace = MarketplaceService::new(store.clone(), ledger.clone(), platform_user_id);

        Self {
            store,
            gateway,
            ledger,
            reconciler,
            payments,
            marketplace,
            platform_user_id,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            payments: self.payments.clone(),
            reconciler: self.reconciler.clone(),
            ledger: self.ledger.clone(),
            marketplace: self.marketplace.clone(),
            health_checker: HealthChecker::in_memory(),
        }
    }

    pub fn app(&self) -> Router {
        credit_ledger_engine::app(self.state())
    }

    /// Give `user` some credits through a completed top-up.
    pub async fn fund(&self, user: Uuid, credits: i64) {
        self.ledger
            .top_up(
                user,
                credits,
                &format!("seed-{}", Uuid::new_v4()),
                serde_json::json!({}),
            )
            .await
            .unwrap();
    }
}

pub fn test_card() -> CardDetails {
    CardDetails {
        number: "4242 4242 4242 4242".to_string(),
        expiry: "12/2034".to_string(),
        cvv: "123".to_string(),
        holder_name: Some("Test Holder".to_string()),
    }
}

pub fn card_payment(user_id: Uuid, credits: i64, amount_minor: i64) -> InitiatePayment {
    InitiatePayment {
        user_id,
        credits,
        amount: Money {
            amount_minor,
            currency: "USD".to_string(),
        },
        card: test_card(),
        customer: CustomerContact::default(),
        description: None,
    }
}

pub fn sign(body: &[u8]) -> String {
    format!(
        "sha256={}",
        sign_payload(body, WEBHOOK_SECRET, SignatureScheme::HmacSha256)
    )
}
