use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    /// `request_sent` is false only when the provider cannot have seen the request.
    #[error("Network error: {message}")]
    NetworkError { message: String, request_sent: bool },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::PaymentDeclinedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    /// True when repeating the request cannot cause a second side effect at the
    /// provider. Money-moving calls are only retried under this condition.
    pub fn is_safe_to_resend(&self) -> bool {
        match self {
            PaymentError::NetworkError { request_sent, .. } => !request_sent,
            PaymentError::RateLimitError { .. } => true,
            _ => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::PaymentDeclinedError { .. } => 402,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::PaymentDeclinedError { .. } => {
                "Payment was declined by the provider".to_string()
            }
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid callback signature".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            PaymentError::ProviderError { provider, .. } => provider.as_str(),
            _ => "payments",
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, SecurityError, ValidationError};

        let kind = match &err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            PaymentError::WebhookVerificationError { message } => {
                AppErrorKind::Security(SecurityError::InvalidSignature {
                    provider: "payments".to_string(),
                    reason: message.clone(),
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "payment provider".to_string(),
                retry_after: *retry_after_seconds,
            }),
            PaymentError::PaymentDeclinedError { message, .. } => {
                AppErrorKind::External(ExternalError::PaymentDeclined {
                    message: message.clone(),
                })
            }
            _ => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: err.provider().to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string(),
            request_sent: true,
        }
        .is_retryable());
        assert!(!PaymentError::PaymentDeclinedError {
            message: "declined".to_string(),
            provider_code: None
        }
        .is_retryable());
    }

    #[test]
    fn only_unsent_requests_are_safe_to_resend() {
        assert!(PaymentError::NetworkError {
            message: "connection refused".to_string(),
            request_sent: false,
        }
        .is_safe_to_resend());
        assert!(!PaymentError::NetworkError {
            message: "read timed out".to_string(),
            request_sent: true,
        }
        .is_safe_to_resend());
        assert!(!PaymentError::ProviderError {
            provider: "hosted_form".to_string(),
            message: "HTTP 503".to_string(),
            provider_code: Some("503".to_string()),
            retryable: true,
        }
        .is_safe_to_resend());
    }
}
