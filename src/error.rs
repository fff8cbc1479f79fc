//! Unified error handling for the payment and ledger service
//!
//! Every layer keeps its own `thiserror` enum and converts into [`AppError`],
//! which owns the HTTP status mapping, user-facing message and error code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_CREDITS")]
    InsufficientCredits,
    #[serde(rename = "INVOICE_NOT_FOUND")]
    InvoiceNotFound,
    #[serde(rename = "ASSIGNMENT_NOT_FOUND")]
    AssignmentNotFound,
    #[serde(rename = "ASSET_NOT_FOUND")]
    AssetNotFound,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "ALREADY_PURCHASED")]
    AlreadyPurchased,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,
    #[serde(rename = "DUPLICATE_TRANSACTION")]
    DuplicateTransaction,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Wallet does not hold enough credits for the operation
    InsufficientBalance { available: i64, required: i64 },
    InvoiceNotFound { invoice_id: String },
    AssignmentNotFound { assignment_id: String },
    AssetNotFound { asset_id: String },
    /// Entity is not in a state that allows the requested transition
    InvalidState {
        entity: String,
        current: String,
        expected: String,
    },
    AlreadyPurchased { asset_id: String },
    /// Authenticated principal may not act on this resource
    Forbidden { reason: String },
    /// No authenticated principal on the request
    Unauthenticated,
    DuplicateTransaction { correlation_key: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
    /// Invariant broken inside the service
    Internal { message: String },
}

/// External service errors (card gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Field present but unusable (card number, expiry, cvv, ...)
    InvalidField { field: String, reason: String },
    InvalidCurrency { currency: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => 402, // Payment Required
                DomainError::InvoiceNotFound { .. } => 404,
                DomainError::AssignmentNotFound { .. } => 404,
                DomainError::AssetNotFound { .. } => 404,
                DomainError::InvalidState { .. } => 409,
                DomainError::AlreadyPurchased { .. } => 409,
                DomainError::Forbidden { .. } => 403,
                DomainError::Unauthenticated => 401,
                DomainError::DuplicateTransaction { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientCredits,
                DomainError::InvoiceNotFound { .. } => ErrorCode::InvoiceNotFound,
                DomainError::AssignmentNotFound { .. } => ErrorCode::AssignmentNotFound,
                DomainError::AssetNotFound { .. } => ErrorCode::AssetNotFound,
                DomainError::InvalidState { .. } => ErrorCode::InvalidState,
                DomainError::AlreadyPurchased { .. } => ErrorCode::AlreadyPurchased,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
                DomainError::Unauthenticated => ErrorCode::Unauthenticated,
                DomainError::DuplicateTransaction { .. } => ErrorCode::DuplicateTransaction,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Internal { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => format!(
                    "Insufficient credits. Available: {}, Required: {}",
                    available, required
                ),
                DomainError::InvoiceNotFound { invoice_id } => {
                    format!("Invoice '{}' not found", invoice_id)
                }
                DomainError::AssignmentNotFound { assignment_id } => {
                    format!("Assignment '{}' not found", assignment_id)
                }
                DomainError::AssetNotFound { asset_id } => {
                    format!("Asset '{}' not found", asset_id)
                }
                DomainError::InvalidState {
                    entity,
                    current,
                    expected,
                } => format!(
                    "{} is {} but must be {} for this operation",
                    entity, current, expected
                ),
                DomainError::AlreadyPurchased { asset_id } => {
                    format!("Asset '{}' has already been purchased", asset_id)
                }
                DomainError::Forbidden { reason } => reason.clone(),
                DomainError::Unauthenticated => "Authentication required".to_string(),
                DomainError::DuplicateTransaction { correlation_key } => {
                    format!("Transaction '{}' already exists", correlation_key)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid {}: {}", field, reason)
                }
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Internal { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientBalance {
            available: 30,
            required: 50,
        }));

        assert_eq!(error.status_code(), 402);
        assert_eq!(error.error_code(), ErrorCode::InsufficientCredits);
        assert!(error.user_message().contains("Available: 30"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "gateway".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::invalid_field("card.number", "failed checksum");

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert_eq!(error.user_message(), "Invalid card.number: failed checksum");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_code_serializes_screaming_case() {
        let code = serde_json::to_string(&ErrorCode::AlreadyPurchased).unwrap();
        assert_eq!(code, "\"ALREADY_PURCHASED\"");
    }

    #[test]
    fn test_unauthenticated_maps_to_401() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::Unauthenticated));
        assert_eq!(error.status_code(), 401);
    }
}
