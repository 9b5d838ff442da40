use crate::models::order::{OrderRef, PaymentStatus};
use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    HostedForm,
    CheckoutSession,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::HostedForm => "hosted_form",
            ProviderName::CheckoutSession => "checkout_session",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "hosted_form" => Ok(ProviderName::HostedForm),
            "checkout_session" => Ok(ProviderName::CheckoutSession),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// A provider status after it has been mapped into the engine's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Known(PaymentStatus),
    /// Raw provider string that maps to nothing we act on.
    Unknown(String),
}

impl CallbackStatus {
    pub fn known(&self) -> Option<PaymentStatus> {
        match self {
            CallbackStatus::Known(status) => Some(*status),
            CallbackStatus::Unknown(_) => None,
        }
    }
}

impl std::fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackStatus::Known(status) => write!(f, "{}", status),
            CallbackStatus::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub order_id: i64,
    pub order_number: String,
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub description: String,
    pub callback_url: String,
    pub return_url: String,
}

/// How the browser is sent to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RedirectInstructions {
    Redirect {
        url: String,
    },
    FormPost {
        action: String,
        fields: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_ref: String,
    pub redirect: RedirectInstructions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub order_number: String,
    /// Gateway session reference recorded when the session was created.
    pub session_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: CallbackStatus,
    pub transaction_ref: Option<String>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub order_number: String,
    pub session_ref: Option<String>,
    pub transaction_ref: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub reason: String,
    /// Stable per refund log row so a resent request is deduplicated upstream.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub provider_reference: Option<String>,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

/// The parts of a callback body the receiver acts on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub order_ref: OrderRef,
    /// `None` when the provider only tells us something changed.
    pub status: Option<CallbackStatus>,
    pub transaction_ref: Option<String>,
}
