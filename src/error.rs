//! Unified error handling for the payments service
//!
//! Module errors (`PaymentError`, `DatabaseError`, service errors) convert into
//! [`AppError`], which carries the HTTP status, a machine-readable code and a
//! client-safe message.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::money::minor_to_major_f64;

/// Machine-readable error codes for client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "PRICE_MISMATCH")]
    PriceMismatch,
    #[serde(rename = "GUIDE_RATE_UNSET")]
    GuideRateUnset,
    #[serde(rename = "REQUEST_NOT_PAYABLE")]
    RequestNotPayable,
    #[serde(rename = "COMPONENTS_UNAVAILABLE")]
    ComponentsUnavailable,
    #[serde(rename = "ORDER_NOT_PAYABLE")]
    OrderNotPayable,
    #[serde(rename = "REFUND_REJECTED")]
    RefundRejected,
    #[serde(rename = "UNSUPPORTED_PROVIDER")]
    UnsupportedProvider,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,

    // Security errors (401, 403)
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "FORBIDDEN_SOURCE")]
    ForbiddenSource,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (402, 429, 502, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "PAYMENT_DECLINED")]
    PaymentDeclined,
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
    /// Entity with the given id doesn't exist
    NotFound { entity: String, id: String },
    /// Stored order total no longer matches live pricing (both in minor units)
    PriceMismatch { expected: i64, current: i64 },
    /// Guide never set a daily rate, or set a non-positive one
    GuideRateUnset { guide_id: i64 },
    /// Underlying request is in a status that cannot be paid
    RequestNotPayable { kind: String, status: String },
    /// Frozen custom-tour components that no longer resolve to active rows
    ComponentsUnavailable { missing: Vec<i64> },
    /// Order payment status does not accept a new payment session
    OrderNotPayable {
        order_number: String,
        payment_status: String,
    },
    /// Refund ledger refused the request
    RefundRejected { order_id: i64, reason: String },
    /// Provider name is not configured
    UnsupportedProvider { provider: String },
    /// Amount is invalid (zero, negative or out of range)
    InvalidAmount { amount: String, reason: String },
}

/// Callback authentication failures. Never change state.
#[derive(Debug, Clone)]
pub enum SecurityError {
    InvalidSignature { provider: String, reason: String },
    ForbiddenSource { provider: String, source_ip: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment gateways)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Gateway refused the charge or refund
    PaymentDeclined { message: String },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    MissingField { field: String },
    /// Body could not be decoded at all
    MalformedPayload { reason: String },
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
    Security(SecurityError),
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

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }))
    }

    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => 404,
                DomainError::PriceMismatch { .. } => 400,
                DomainError::GuideRateUnset { .. } => 409,
                DomainError::RequestNotPayable { .. } => 409,
                DomainError::ComponentsUnavailable { .. } => 409,
                DomainError::OrderNotPayable { .. } => 409,
                DomainError::RefundRejected { .. } => 409,
                DomainError::UnsupportedProvider { .. } => 404,
                DomainError::InvalidAmount { .. } => 400,
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::InvalidSignature { .. } => 401,
                SecurityError::ForbiddenSource { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::PaymentDeclined { .. } => 402,
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
                DomainError::NotFound { entity, .. } if entity == "Order" => {
                    ErrorCode::OrderNotFound
                }
                DomainError::NotFound { .. } => ErrorCode::NotFound,
                DomainError::PriceMismatch { .. } => ErrorCode::PriceMismatch,
                DomainError::GuideRateUnset { .. } => ErrorCode::GuideRateUnset,
                DomainError::RequestNotPayable { .. } => ErrorCode::RequestNotPayable,
                DomainError::ComponentsUnavailable { .. } => ErrorCode::ComponentsUnavailable,
                DomainError::OrderNotPayable { .. } => ErrorCode::OrderNotPayable,
                DomainError::RefundRejected { .. } => ErrorCode::RefundRejected,
                DomainError::UnsupportedProvider { .. } => ErrorCode::UnsupportedProvider,
                DomainError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
                SecurityError::ForbiddenSource { .. } => ErrorCode::ForbiddenSource,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::PaymentDeclined { .. } => ErrorCode::PaymentDeclined,
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
                DomainError::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
                DomainError::PriceMismatch { .. } => {
                    "The price has changed since this order was created. Please review the updated price".to_string()
                }
                DomainError::GuideRateUnset { .. } => {
                    "This guide has not set a daily rate yet".to_string()
                }
                DomainError::RequestNotPayable { kind, status } => {
                    format!("This {} request cannot be paid while it is {}", kind, status)
                }
                DomainError::ComponentsUnavailable { .. } => {
                    "Some components of this custom tour are no longer available".to_string()
                }
                DomainError::OrderNotPayable {
                    order_number,
                    payment_status,
                } => format!(
                    "Order '{}' cannot be paid (payment status: {})",
                    order_number, payment_status
                ),
                DomainError::RefundRejected { reason, .. } => {
                    format!("Refund rejected: {}", reason)
                }
                DomainError::UnsupportedProvider { provider } => {
                    format!("Payment provider '{}' is not supported", provider)
                }
                DomainError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::InvalidSignature { .. } => "Invalid signature".to_string(),
                SecurityError::ForbiddenSource { .. } => "Source address not allowed".to_string(),
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
                ExternalError::PaymentDeclined { message } => {
                    format!("Payment was declined: {}", message)
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
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::MalformedPayload { reason } => {
                    format!("Malformed request body: {}", reason)
                }
            },
        }
    }

    /// Structured extras for the response body
    pub fn details(&self) -> Option<serde_json::Value> {
        match &self.kind {
            AppErrorKind::Domain(DomainError::PriceMismatch { expected, current }) => {
                Some(serde_json::json!({
                    "expectedPrice": minor_to_major_f64(*expected),
                    "currentPrice": minor_to_major_f64(*current),
                }))
            }
            AppErrorKind::Domain(DomainError::ComponentsUnavailable { missing }) => {
                Some(serde_json::json!({ "missingComponentIds": missing }))
            }
            AppErrorKind::Validation(ValidationError::InvalidField { field, reason }) => {
                Some(serde_json::json!({ "field": field, "error": reason }))
            }
            AppErrorKind::External(ExternalError::RateLimit {
                retry_after: Some(secs),
                ..
            }) => Some(serde_json::json!({ "retryAfter": secs })),
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) | AppErrorKind::Security(_) | AppErrorKind::Validation(_) => {
                false
            }
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::PaymentDeclined { .. } => false,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs and From<PaymentError> in payments/error.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_mismatch_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::PriceMismatch {
            expected: 45_000,
            current: 30_000,
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::PriceMismatch);
        let details = error.details().expect("price mismatch carries details");
        assert_eq!(details["expectedPrice"].as_f64(), Some(450.0));
        assert_eq!(details["currentPrice"].as_f64(), Some(300.0));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_order_not_found_has_specific_code() {
        let error = AppError::not_found("Order", 77);
        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::OrderNotFound);

        let other = AppError::not_found("RefundLog", 3);
        assert_eq!(other.error_code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_security_errors() {
        let signature = AppError::new(AppErrorKind::Security(SecurityError::InvalidSignature {
            provider: "hosted_form".to_string(),
            reason: "hash mismatch".to_string(),
        }));
        assert_eq!(signature.status_code(), 401);
        assert_eq!(signature.user_message(), "Invalid signature");

        let source = AppError::new(AppErrorKind::Security(SecurityError::ForbiddenSource {
            provider: "hosted_form".to_string(),
            source_ip: "198.51.100.7".to_string(),
        }));
        assert_eq!(source.status_code(), 403);
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "checkout_session".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }
}
