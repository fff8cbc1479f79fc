//! HTTP surface driven through the router with `oneshot`.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{sign, Harness};
use credit_ledger_engine::payments::challenge::ChallengeState;
use credit_ledger_engine::payments::types::AuthorizationOutcome;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn initiate_body() -> Value {
    json!({
        "credits": 10,
        "amount_minor": 1000,
        "currency": "USD",
        "card": {
            "number": "4242424242424242",
            "expiry": "12/34",
            "cvv": "123"
        }
    })
}

fn post_json(uri: &str, user: Option<Uuid>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn initiate_with_immediate_success_returns_balance() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.gateway
        .push_authorization(Some("pay_api_ok"), AuthorizationOutcome::Success);

    let response = h
        .app()
        .oneshot(post_json("/api/payments/initiate", Some(user), &initiate_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["balance"], 10);
    assert!(json["invoice_id"].is_string());
}

#[tokio::test]
async fn initiate_without_user_is_unauthenticated() {
    let h = Harness::new();
    let response = h
        .app()
        .oneshot(post_json("/api/payments/initiate", None, &initiate_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn initiate_with_bad_cvv_is_bad_request() {
    let h = Harness::new();
    let mut body = initiate_body();
    body["card"]["cvv"] = json!("12");

    let response = h
        .app()
        .oneshot(post_json("/api/payments/initiate", Some(Uuid::new_v4()), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.gateway.authorize_calls(), 0);
}

#[tokio::test]
async fn status_endpoint_returns_exact_acs_fields() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.gateway.push_authorization(
        Some("pay_api_3ds"),
        AuthorizationOutcome::ThreeDsRequired(ChallengeState::AcsRedirect {
            acs_url: "https://acs.bank.test".to_string(),
            pa_req: "PAREQ".to_string(),
            md: "MD1".to_string(),
        }),
    );
    let app = h.app();

    let response = app
        .clone()
        .oneshot(post_json("/api/payments/initiate", Some(user), &initiate_body()))
        .await
        .unwrap();
    let invoice_id = body_json(response).await["invoice_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/payments/{}/status", invoice_id), Some(user)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({
            "status": "3ds_required",
            "acs_url": "https://acs.bank.test",
            "pa_req": "PAREQ",
            "md": "MD1"
        })
    );

    let response = app
        .oneshot(get(&format!("/api/payments/{}/status", invoice_id), Some(Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_always_answers_200() {
    let h = Harness::new();
    let app = h.app();

    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhooks/gateway")
        .body(Body::from(r#"{"payment_id":"x","status":"success"}"#))
        .unwrap();
    let response = app.clone().oneshot(unsigned).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "unauthenticated");

    let payload = br#"{"payment_id":"x","status":"success"}"#;
    let signed = Request::builder()
        .method("POST")
        .uri("/webhooks/gateway")
        .header("x-gateway-signature", sign(payload))
        .body(Body::from(payload.to_vec()))
        .unwrap();
    let response = app.oneshot(signed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "unknown_payment");
}

#[tokio::test]
async fn challenge_return_accepts_form_posts() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.gateway.push_authorization(
        Some("pay_form"),
        AuthorizationOutcome::ThreeDsRequired(ChallengeState::AcsRedirect {
            acs_url: "https://acs.bank.test".to_string(),
            pa_req: "PAREQ".to_string(),
            md: "MD1".to_string(),
        }),
    );
    h.payments
        .initiate(common::card_payment(user, 10, 1000))
        .await
        .unwrap();
    h.gateway
        .push_status(credit_ledger_engine::payments::types::GatewayStatus::Success);

    let request = Request::builder()
        .method("POST")
        .uri("/api/payments/3ds/complete")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("payment_id=pay_form&PaRes=abc"))
        .unwrap();
    let response = h.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["balance"], 10);
}

#[tokio::test]
async fn fingerprint_endpoints_report_unknown_references() {
    let h = Harness::new();
    let response = h
        .app()
        .oneshot(get("/api/payments/3ds/fingerprint?payment_id=pay_none", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["found"], false);
}

#[tokio::test]
async fn wallet_and_history_reflect_top_ups() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.fund(user, 40).await;
    h.fund(user, 2).await;
    let app = h.app();

    let response = app.clone().oneshot(get("/api/wallet", Some(user))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wallet = body_json(response).await;
    assert_eq!(wallet["balance"], 42);
    assert_eq!(wallet["total_spent"], 0);

    let response = app
        .oneshot(get("/api/wallet/transactions?limit=1", Some(user)))
        .await
        .unwrap();
    let history = body_json(response).await;
    assert_eq!(history["count"], 1);
    assert_eq!(history["transactions"][0]["amount"], 2);
}

#[tokio::test]
async fn hire_with_insufficient_credits_is_402() {
    let h = Harness::new();
    let client = Uuid::new_v4();
    h.fund(client, 30).await;
    let assignment = h.store.insert_assignment(client, Uuid::new_v4(), 50).await;

    let response = h
        .app()
        .oneshot(post_json(
            &format!("/api/assignments/{}/hire", assignment.id),
            Some(client),
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body_json(response).await["error"], "INSUFFICIENT_CREDITS");
}

#[tokio::test]
async fn purchase_without_body_uses_default_id() {
    let h = Harness::new();
    let buyer = Uuid::new_v4();
    h.fund(buyer, 50).await;
    let asset = h.store.insert_asset(Uuid::new_v4(), "pier", 50).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/assets/{}/purchase", asset.id))
        .header("x-user-id", buyer.to_string())
        .body(Body::empty())
        .unwrap();
    let response = h.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let receipt = body_json(response).await;
    assert_eq!(receipt["balance"], 0);
    assert_eq!(receipt["purchase"]["creator_cut"], 40);
    assert_eq!(receipt["purchase"]["status"], "COMPLETED");
}

#[tokio::test]
async fn liveness_is_ok() {
    let h = Harness::new();
    let response = h.app().oneshot(get("/health/live", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
