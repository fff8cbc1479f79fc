//! HTTP contract of the acquirer client, against a wiremock server.

use credit_ledger_engine::payments::card::CardDetails;
use credit_ledger_engine::payments::challenge::ChallengeState;
use credit_ledger_engine::payments::error::PaymentError;
use credit_ledger_engine::payments::providers::{AcquirerConfig, AcquirerGateway};
use credit_ledger_engine::payments::types::{
    AuthorizationOutcome, AuthorizationRequest, CustomerContact, GatewayStatus, Money,
};
use credit_ledger_engine::payments::PaymentGateway;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer, max_retries: u32) -> AcquirerGateway {
    AcquirerGateway::new(AcquirerConfig {
        api_key: "sk_test_123".to_string(),
        base_url: server.uri(),
        timeout_secs: 5,
        max_retries,
        ..AcquirerConfig::default()
    })
    .unwrap()
}

fn request() -> AuthorizationRequest {
    AuthorizationRequest {
        order_reference: "inv-1".to_string(),
        amount: Money {
            amount_minor: 1000,
            currency: "usd".to_string(),
        },
        card: CardDetails {
            number: "4242 4242 4242 4242".to_string(),
            expiry: "11/2033".to_string(),
            cvv: "321".to_string(),
            holder_name: None,
        },
        customer: CustomerContact::default(),
        return_url: Some("https://shop.test/3ds?invoice_id=inv-1".to_string()),
        description: None,
    }
}

#[tokio::test]
async fn authorize_sends_card_and_parses_basic_challenge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_partial_json(json!({
            "amount": 1000,
            "currency": "USD",
            "card": { "number": "4242424242424242", "expiry_month": 11, "expiry_year": 2033 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_id": "pay_wm_1",
            "status": "3ds_required",
            "three_ds": { "acs_url": "https://acs.test", "pa_req": "PR", "md": "M" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = gateway(&server, 0).authorize(request()).await.unwrap();
    assert_eq!(response.payment_id.as_deref(), Some("pay_wm_1"));
    assert_eq!(
        response.outcome,
        AuthorizationOutcome::ThreeDsRequired(ChallengeState::AcsRedirect {
            acs_url: "https://acs.test".to_string(),
            pa_req: "PR".to_string(),
            md: "M".to_string(),
        })
    );
}

#[tokio::test]
async fn authorize_decline_carries_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_id": "pay_wm_2",
            "status": "declined",
            "message": "do not honour"
        })))
        .mount(&server)
        .await;

    let response = gateway(&server, 0).authorize(request()).await.unwrap();
    match response.outcome {
        AuthorizationOutcome::Declined { message, .. } => assert_eq!(message, "do not honour"),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn authorize_is_not_retried_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway(&server, 2).authorize(request()).await.unwrap_err();
    assert!(matches!(err, PaymentError::ProviderError { retryable: true, .. }));
}

#[tokio::test]
async fn malformed_gateway_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    assert!(gateway(&server, 0).authorize(request()).await.is_err());
}

#[tokio::test]
async fn status_poll_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_wm_3"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_wm_3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })))
        .mount(&server)
        .await;

    let status = gateway(&server, 1)
        .get_payment_status("pay_wm_3")
        .await
        .unwrap();
    assert_eq!(status.status, GatewayStatus::Success);
}

#[tokio::test]
async fn status_poll_reports_new_3ds2_challenge() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_wm_4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "3ds_required",
            "three_ds": {
                "iframe_url": "https://acs.test/method",
                "threeds2": { "acs_url": "https://acs.test/creq", "creq": "CR" }
            }
        })))
        .mount(&server)
        .await;

    let status = gateway(&server, 0)
        .get_payment_status("pay_wm_4")
        .await
        .unwrap();
    assert_eq!(
        status.status,
        GatewayStatus::ChallengeReady(ChallengeState::ThreeDs2Challenge {
            acs_url: "https://acs.test/creq".to_string(),
            creq: "CR".to_string(),
            session_data: None,
        })
    );
}
