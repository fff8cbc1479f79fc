//! Field extraction for gateway webhook payloads.
//!
//! The gateway does not use one consistent field name for the payment
//! identifier, so several locations are probed in order. Only call this on a
//! payload whose signature has already been verified.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{PaymentState, WebhookEvent};
use serde_json::Value as JsonValue;

const PAYMENT_ID_POINTERS: &[&str] = &[
    "/payment_id",
    "/paymentId",
    "/data/payment_id",
    "/data/paymentId",
    "/data/id",
    "/payment/id",
    "/object/id",
    "/transaction/payment_id",
    "/id",
];

const STATUS_POINTERS: &[&str] = &[
    "/status",
    "/data/status",
    "/payment/status",
    "/object/status",
    "/transaction/status",
];

const EVENT_POINTERS: &[&str] = &["/event", "/type", "/event_type"];

const MESSAGE_POINTERS: &[&str] = &[
    "/message",
    "/data/message",
    "/decline_reason",
    "/data/decline_reason",
    "/payment/message",
];

pub fn parse_webhook_event(payload: &[u8]) -> PaymentResult<WebhookEvent> {
    let parsed: JsonValue =
        serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
            message: format!("invalid webhook JSON payload: {}", e),
            field: Some("body".to_string()),
        })?;
    if !parsed.is_object() {
        return Err(PaymentError::ValidationError {
            message: "webhook payload must be a JSON object".to_string(),
            field: Some("body".to_string()),
        });
    }

    let event_type = first_string(&parsed, EVENT_POINTERS).unwrap_or_else(|| "unknown".to_string());

    // An explicit status field wins; the event name is only a fallback.
    let status = first_string(&parsed, STATUS_POINTERS)
        .map(|s| PaymentState::from_provider_str(&s))
        .filter(|s| *s != PaymentState::Unknown)
        .unwrap_or_else(|| PaymentState::from_provider_str(&event_type));

    Ok(WebhookEvent {
        payment_id: extract_payment_id(&parsed),
        status,
        message: first_string(&parsed, MESSAGE_POINTERS),
        event_type,
        payload: parsed,
        received_at: chrono::Utc::now().to_rfc3339(),
    })
}

pub fn extract_payment_id(payload: &JsonValue) -> Option<String> {
    first_string(payload, PAYMENT_ID_POINTERS)
}

fn first_string(payload: &JsonValue, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| payload.pointer(p))
        .filter_map(|v| match v {
            JsonValue::String(s) => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payment_id_is_found_in_each_known_location() {
        let cases = vec![
            json!({"payment_id": "pay_a"}),
            json!({"paymentId": "pay_a"}),
            json!({"data": {"payment_id": "pay_a"}}),
            json!({"data": {"id": "pay_a"}}),
            json!({"payment": {"id": "pay_a"}}),
            json!({"object": {"id": "pay_a"}}),
            json!({"transaction": {"payment_id": "pay_a"}}),
            json!({"id": "pay_a"}),
        ];
        for case in cases {
            assert_eq!(extract_payment_id(&case).as_deref(), Some("pay_a"), "{case}");
        }
    }

    #[test]
    fn specific_fields_win_over_generic_id() {
        let payload = json!({"id": "evt_1", "data": {"payment_id": "pay_b"}});
        assert_eq!(extract_payment_id(&payload).as_deref(), Some("pay_b"));
    }

    #[test]
    fn numeric_identifiers_are_stringified() {
        let payload = json!({"data": {"id": 42}});
        assert_eq!(extract_payment_id(&payload).as_deref(), Some("42"));
    }

    #[test]
    fn status_falls_back_to_event_name() {
        let event =
            parse_webhook_event(br#"{"event":"payment.succeeded","data":{"id":"pay_c"}}"#).unwrap();
        assert_eq!(event.status, PaymentState::Success);
        assert_eq!(event.payment_id.as_deref(), Some("pay_c"));

        let event = parse_webhook_event(
            br#"{"event":"payment.updated","data":{"id":"pay_c","status":"declined","message":"do not honor"}}"#,
        )
        .unwrap();
        assert_eq!(event.status, PaymentState::Failed);
        assert_eq!(event.message.as_deref(), Some("do not honor"));
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(parse_webhook_event(b"not json").is_err());
        assert!(parse_webhook_event(b"[1,2,3]").is_err());
    }
}
