mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{card_payment, sign, Harness};
use credit_ledger_engine::database::invoice_repository::{InvoiceStatus, InvoiceStore};
use credit_ledger_engine::payments::error::PaymentError;
use credit_ledger_engine::payments::types::AuthorizationOutcome;
use credit_ledger_engine::workers::invoice_sweep::{InvoiceSweepConfig, InvoiceSweepWorker};
use std::time::Duration;
use uuid::Uuid;

fn worker(h: &Harness) -> InvoiceSweepWorker {
    InvoiceSweepWorker::new(
        h.store.clone(),
        h.reconciler.clone(),
        InvoiceSweepConfig {
            pending_timeout: Some(Duration::from_secs(900)),
            ..InvoiceSweepConfig::default()
        },
    )
}

#[tokio::test]
async fn stale_invoice_without_verdict_is_failed() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.gateway
        .push_authorization(Some("pay_stale"), AuthorizationOutcome::Pending);
    let outcome = h.payments.initiate(card_payment(user, 5, 500)).await.unwrap();
    h.store
        .backdate_invoice(outcome.invoice.id, Utc::now() - ChronoDuration::hours(1))
        .await;

    let report = worker(&h).sweep_once(Duration::from_secs(900)).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.expired, 1);

    let invoice = h.store.find_by_id(outcome.invoice.id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Failed);
    assert_eq!(h.store.entry_count().await, 0);
}

#[tokio::test]
async fn stale_invoice_with_ledger_credit_is_repaired() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.gateway
        .push_authorization(Some("pay_late"), AuthorizationOutcome::Pending);
    let outcome = h.payments.initiate(card_payment(user, 5, 500)).await.unwrap();
    h.ledger
        .top_up(user, 5, "pay_late", serde_json::json!({}))
        .await
        .unwrap();
    h.store
        .backdate_invoice(outcome.invoice.id, Utc::now() - ChronoDuration::hours(2))
        .await;

    let report = worker(&h).sweep_once(Duration::from_secs(900)).await.unwrap();
    assert_eq!(report.repaired, 1);

    let invoice = h.store.find_by_id(outcome.invoice.id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(h.store.entry_count().await, 1);
}

#[tokio::test]
async fn fresh_invoices_are_left_alone() {
    let h = Harness::new();
    h.gateway
        .push_authorization(Some("pay_fresh"), AuthorizationOutcome::Pending);
    let outcome = h
        .payments
        .initiate(card_payment(Uuid::new_v4(), 5, 500))
        .await
        .unwrap();

    let report = worker(&h).sweep_once(Duration::from_secs(900)).await.unwrap();
    assert_eq!(report.examined, 0);
    let invoice = h.store.find_by_id(outcome.invoice.id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);
}

#[tokio::test]
async fn unreachable_gateway_defers_expiry_and_late_success_still_credits() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.gateway
        .push_authorization(Some("pay_sw"), AuthorizationOutcome::Pending);
    let outcome = h.payments.initiate(card_payment(user, 5, 500)).await.unwrap();
    h.store
        .backdate_invoice(outcome.invoice.id, Utc::now() - ChronoDuration::hours(1))
        .await;
    h.gateway.push_status_error(PaymentError::NetworkError {
        message: "connection reset".to_string(),
    });

    let report = worker(&h).sweep_once(Duration::from_secs(900)).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.expired, 0);

    let invoice = h.store.find_by_id(outcome.invoice.id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);

    let payload = br#"{"payment_id":"pay_sw","status":"success"}"#;
    let ack = h.reconciler.handle_webhook(payload, Some(&sign(payload))).await;
    assert_eq!(ack.status, "credited");
    assert_eq!(h.store.entry_count().await, 1);
    assert_eq!(h.store.ledger_sum(user).await, 5);
}
