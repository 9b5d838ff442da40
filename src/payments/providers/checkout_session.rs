use crate::models::order::{OrderRef, PaymentStatus};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::hosted_form::{parse_ip_list, required_env};
use crate::payments::types::{
    CallbackPayload, CallbackStatus, ProviderName, RedirectInstructions, RefundRequest,
    RefundResponse, SessionRequest, SessionResponse, StatusRequest, StatusResponse,
    WebhookVerificationResult,
};
use crate::payments::utils::{verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Clone)]
pub struct CheckoutSessionConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub callback_ips: Vec<IpAddr>,
}

impl CheckoutSessionConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            secret_key: required_env("CHECKOUT_SESSION_SECRET_KEY")?,
            webhook_secret: std::env::var("CHECKOUT_SESSION_WEBHOOK_SECRET").ok(),
            base_url: required_env("CHECKOUT_SESSION_BASE_URL")?,
            timeout_secs: std::env::var("CHECKOUT_SESSION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            callback_ips: parse_ip_list(
                &std::env::var("CHECKOUT_SESSION_CALLBACK_IPS").unwrap_or_default(),
                "CHECKOUT_SESSION_CALLBACK_IPS",
            )?,
        })
    }
}

/// Hosted checkout page gateway. Its callbacks only name the order, so the
/// status always comes from polling the session.
pub struct CheckoutSessionGateway {
    config: CheckoutSessionConfig,
    http: PaymentHttpClient,
}

impl CheckoutSessionGateway {
    pub fn new(config: CheckoutSessionConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            ProviderName::CheckoutSession.as_str(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(CheckoutSessionConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn webhook_secret(&self) -> &str {
        self.config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key)
    }
}

pub fn map_status(raw: &str) -> CallbackStatus {
    match raw.trim().to_lowercase().as_str() {
        "paid" | "charged" | "complete" | "completed" | "succeeded" => {
            CallbackStatus::Known(PaymentStatus::Paid)
        }
        "open" | "unpaid" | "processing" | "requires_action" => {
            CallbackStatus::Known(PaymentStatus::Processing)
        }
        "expired" | "failed" | "declined" | "rejected" | "canceled" | "cancelled" => {
            CallbackStatus::Known(PaymentStatus::Failed)
        }
        "refunded" => CallbackStatus::Known(PaymentStatus::Refunded),
        "partially_refunded" => CallbackStatus::Known(PaymentStatus::PartiallyRefunded),
        other => CallbackStatus::Unknown(other.to_string()),
    }
}

#[async_trait]
impl PaymentGateway for CheckoutSessionGateway {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<SessionResponse> {
        if request.amount_minor <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let payload = serde_json::json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "reference": request.order_number,
            "description": request.description,
            "customer_email": request.customer_email,
            "success_url": request.return_url,
            "cancel_url": request.return_url,
            "callback_url": request.callback_url,
            "metadata": { "order_id": request.order_id },
        });

        let raw: CheckoutSessionData = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/sessions"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[],
            )
            .await?;

        let url = raw.url.ok_or(PaymentError::ProviderError {
            provider: ProviderName::CheckoutSession.to_string(),
            message: "session response is missing url".to_string(),
            provider_code: None,
            retryable: false,
        })?;
        info!(order_number = %request.order_number, session_id = %raw.id, "checkout session created");

        Ok(SessionResponse {
            session_ref: raw.id,
            redirect: RedirectInstructions::Redirect { url },
        })
    }

    async fn poll_status(&self, request: StatusRequest) -> PaymentResult<StatusResponse> {
        let session_id = request
            .session_ref
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ValidationError {
                message: format!("order {} has no checkout session", request.order_number),
                field: Some("session_ref".to_string()),
            })?;

        let raw: CheckoutSessionData = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/sessions/{}", session_id)),
                Some(&self.config.secret_key),
                None,
                &[],
            )
            .await?;

        let reported = raw
            .payment_status
            .as_deref()
            .or(raw.status.as_deref())
            .unwrap_or_default();

        Ok(StatusResponse {
            status: map_status(reported),
            transaction_ref: raw.transaction_id,
            provider_data: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let session_id = request.session_ref.clone().ok_or(PaymentError::ValidationError {
            message: format!("order {} has no checkout session", request.order_number),
            field: Some("session_ref".to_string()),
        })?;

        let payload = serde_json::json!({
            "session_id": session_id,
            "amount": request.amount_minor,
            "currency": request.currency,
            "reason": request.reason,
            "metadata": { "order_number": request.order_number },
        });

        let raw = self
            .http
            .request_raw(
                reqwest::Method::POST,
                &self.endpoint("/v1/refunds"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[("Idempotency-Key", request.idempotency_key.as_str())],
            )
            .await?;

        let parsed: CheckoutRefundData =
            serde_json::from_value(raw.clone()).map_err(|e| PaymentError::ProviderError {
                provider: ProviderName::CheckoutSession.to_string(),
                message: format!("unexpected refund response: {}", e),
                provider_code: None,
                retryable: false,
            })?;

        match parsed.status.as_str() {
            "succeeded" | "pending" => Ok(RefundResponse {
                provider_reference: Some(parsed.id),
                raw,
            }),
            other => {
                warn!(order_number = %request.order_number, status = other, "checkout refund declined");
                Err(PaymentError::PaymentDeclinedError {
                    message: parsed
                        .failure_reason
                        .unwrap_or_else(|| format!("refund {}", other)),
                    provider_code: Some(other.to_string()),
                })
            }
        }
    }

    fn name(&self) -> ProviderName {
        ProviderName::CheckoutSession
    }

    fn callback_ips(&self) -> &[IpAddr] {
        &self.config.callback_ips
    }

    fn verify_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult> {
        let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
            Some(signature) => signature,
            None => {
                return Ok(WebhookVerificationResult {
                    valid: false,
                    reason: Some("missing signature header".to_string()),
                })
            }
        };

        let valid = verify_hmac_sha512_hex(body, self.webhook_secret(), signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid checkout session signature".to_string())
            },
        })
    }

    fn parse_callback(&self, _headers: &HeaderMap, body: &[u8]) -> PaymentResult<CallbackPayload> {
        let parsed: JsonValue =
            serde_json::from_slice(body).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid callback JSON payload: {}", e),
                field: Some("body".to_string()),
            })?;

        let raw_order = match parsed.get("order_id") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => {
                return Err(PaymentError::ValidationError {
                    message: "callback is missing order_id".to_string(),
                    field: Some("order_id".to_string()),
                })
            }
        };
        let order_ref = OrderRef::parse(&raw_order).ok_or(PaymentError::ValidationError {
            message: "callback order_id is empty".to_string(),
            field: Some("order_id".to_string()),
        })?;

        Ok(CallbackPayload {
            order_ref,
            status: None,
            transaction_ref: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionData {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutRefundData {
    id: String,
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}
