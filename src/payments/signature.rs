//! Authenticity check for inbound gateway webhooks.
//!
//! Runs over the raw request bytes, before any JSON parsing.

use crate::payments::error::PaymentError;
use crate::payments::types::WebhookVerificationResult;
use crate::payments::utils::{verify_hmac_sha256_hex, verify_hmac_sha512_hex};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
    HmacSha512,
}

impl SignatureScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::HmacSha256 => "hmac-sha256",
            SignatureScheme::HmacSha512 => "hmac-sha512",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            SignatureScheme::HmacSha256 => "sha256=",
            SignatureScheme::HmacSha512 => "sha512=",
        }
    }
}

impl FromStr for SignatureScheme {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "hmac-sha256" | "sha256" => Ok(SignatureScheme::HmacSha256),
            "hmac-sha512" | "sha512" => Ok(SignatureScheme::HmacSha512),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported signature scheme: {}", value),
                field: Some("GATEWAY_SIGNATURE_SCHEME".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    scheme: SignatureScheme,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, scheme: SignatureScheme) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
            scheme,
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Verify `signature` against the raw `payload`.
    ///
    /// A verifier without a configured secret rejects everything.
    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> WebhookVerificationResult {
        let Some(secret) = self.secret.as_deref() else {
            return rejected("webhook secret is not configured");
        };
        let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return rejected("missing signature header");
        };
        let signature = strip_prefix_ignore_case(signature, self.scheme.prefix());

        let valid = match self.scheme {
            SignatureScheme::HmacSha256 => verify_hmac_sha256_hex(payload, secret, signature),
            SignatureScheme::HmacSha512 => verify_hmac_sha512_hex(payload, secret, signature),
        };
        if valid {
            WebhookVerificationResult {
                valid: true,
                reason: None,
            }
        } else {
            rejected("signature mismatch")
        }
    }
}

fn rejected(reason: &str) -> WebhookVerificationResult {
    WebhookVerificationResult {
        valid: false,
        reason: Some(reason.to_string()),
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> &'a str {
    match value.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &value[prefix.len()..],
        _ => value,
    }
}

/// Hex HMAC of `payload`, in the format the gateway sends.
pub fn sign_payload(payload: &[u8], secret: &str, scheme: SignatureScheme) -> String {
    use hmac::{Hmac, Mac};
    use sha2::{Sha256, Sha512};

    match scheme {
        SignatureScheme::HmacSha256 => {
            let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return String::new(),
            };
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureScheme::HmacSha512 => {
            let mut mac = match Hmac::<Sha512>::new_from_slice(secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return String::new(),
            };
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}
