use crate::models::order::{OrderRef, PaymentStatus};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CallbackPayload, CallbackStatus, ProviderName, RedirectInstructions, RefundRequest,
    RefundResponse, SessionRequest, SessionResponse, StatusRequest, StatusResponse,
    WebhookVerificationResult,
};
use crate::payments::utils::{hmac_sha256_hex, verify_hmac_sha256_hex, PaymentHttpClient};
use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HostedFormConfig {
    pub merchant_key: String,
    pub password: String,
    /// API host for status and refund calls.
    pub base_url: String,
    /// Where the browser form is posted.
    pub payment_url: String,
    pub timeout_secs: u64,
    pub callback_ips: Vec<IpAddr>,
}

impl HostedFormConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let merchant_key = required_env("HOSTED_FORM_MERCHANT_KEY")?;
        let password = required_env("HOSTED_FORM_PASSWORD")?;
        let base_url = required_env("HOSTED_FORM_BASE_URL")?;
        let payment_url = std::env::var("HOSTED_FORM_PAYMENT_URL")
            .unwrap_or_else(|_| format!("{}/pay", base_url.trim_end_matches('/')));

        Ok(Self {
            merchant_key,
            password,
            payment_url,
            timeout_secs: std::env::var("HOSTED_FORM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            callback_ips: parse_ip_list(
                &std::env::var("HOSTED_FORM_CALLBACK_IPS").unwrap_or_default(),
                "HOSTED_FORM_CALLBACK_IPS",
            )?,
            base_url,
        })
    }
}

pub(crate) fn required_env(key: &str) -> PaymentResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(PaymentError::ValidationError {
            message: format!("{} environment variable is required", key),
            field: Some(key.to_string()),
        })
}

pub(crate) fn parse_ip_list(raw: &str, field: &str) -> PaymentResult<Vec<IpAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<IpAddr>().map_err(|_| PaymentError::ValidationError {
                message: format!("invalid IP address in {}: {}", field, v),
                field: Some(field.to_string()),
            })
        })
        .collect()
}

/// Legacy gateway: the browser posts a signed form, the gateway calls back
/// with a signed form or JSON body.
pub struct HostedFormGateway {
    config: HostedFormConfig,
    secret_key: String,
    http: PaymentHttpClient,
}

impl HostedFormGateway {
    pub fn new(config: HostedFormConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            ProviderName::HostedForm.as_str(),
            Duration::from_secs(config.timeout_secs),
        )?;
        let secret_key = derive_secret_key(&config.merchant_key, &config.password);
        Ok(Self {
            config,
            secret_key,
            http,
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(HostedFormConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn sign(&self, parts: &[&str]) -> String {
        hmac_sha256_hex(self.secret_key.as_bytes(), parts.concat().as_bytes())
    }

    /// Token the gateway checks on the posted form.
    pub fn session_token(&self, order_number: &str, amount_minor: i64, callback_url: &str) -> String {
        self.sign(&[
            &self.config.merchant_key,
            order_number,
            &amount_minor.to_string(),
            callback_url,
        ])
    }

    /// Expected `hash` field of a callback.
    pub fn callback_hash(&self, order_id: &str, status: &str, transaction_id: &str) -> String {
        self.sign(&[&self.config.merchant_key, order_id, status, transaction_id])
    }
}

/// `hex(HMAC-SHA256(key = merchant_key, msg = password))`.
pub fn derive_secret_key(merchant_key: &str, password: &str) -> String {
    hmac_sha256_hex(merchant_key.as_bytes(), password.as_bytes())
}

/// Maps the gateway's status words into the engine's states.
pub fn map_status(raw: &str) -> CallbackStatus {
    match raw.trim().to_lowercase().as_str() {
        "success" | "successful" | "charged" | "captured" | "paid" | "approved" => {
            CallbackStatus::Known(PaymentStatus::Paid)
        }
        "pending" | "processing" | "initiated" | "in_progress" => {
            CallbackStatus::Known(PaymentStatus::Processing)
        }
        "failed" | "declined" | "rejected" | "cancelled" | "canceled" | "error" | "expired" => {
            CallbackStatus::Known(PaymentStatus::Failed)
        }
        "refunded" | "full_refund" => CallbackStatus::Known(PaymentStatus::Refunded),
        "partially_refunded" | "partial_refund" => {
            CallbackStatus::Known(PaymentStatus::PartiallyRefunded)
        }
        other => CallbackStatus::Unknown(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HostedFormCallback {
    order_id: String,
    status: String,
    transaction_id: String,
    hash: String,
}

fn decode_callback(headers: &HeaderMap, body: &[u8]) -> PaymentResult<HostedFormCallback> {
    let is_json = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or_else(|| body.first() == Some(&b'{'));

    let fields: HashMap<String, String> = if is_json {
        let parsed: JsonValue =
            serde_json::from_slice(body).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid callback JSON payload: {}", e),
                field: Some("body".to_string()),
            })?;
        let object = parsed.as_object().ok_or(PaymentError::ValidationError {
            message: "callback payload must be an object".to_string(),
            field: Some("body".to_string()),
        })?;
        object
            .iter()
            .filter_map(|(k, v)| {
                let value = match v {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Number(n) => n.to_string(),
                    JsonValue::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((k.clone(), value))
            })
            .collect()
    } else {
        serde_urlencoded::from_bytes(body).map_err(|e| PaymentError::ValidationError {
            message: format!("invalid callback form payload: {}", e),
            field: Some("body".to_string()),
        })?
    };

    let field = |name: &str| fields.get(name).map(|v| v.trim().to_string());
    let order_id = field("order_id")
        .filter(|v| !v.is_empty())
        .ok_or(PaymentError::ValidationError {
            message: "callback is missing order_id".to_string(),
            field: Some("order_id".to_string()),
        })?;

    Ok(HostedFormCallback {
        order_id,
        status: field("status").unwrap_or_default(),
        transaction_id: field("transaction_id").unwrap_or_default(),
        hash: field("hash").unwrap_or_default(),
    })
}

#[async_trait]
impl PaymentGateway for HostedFormGateway {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<SessionResponse> {
        if request.amount_minor <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let token = self.session_token(
            &request.order_number,
            request.amount_minor,
            &request.callback_url,
        );

        let mut fields = BTreeMap::new();
        fields.insert("merchant_key".to_string(), self.config.merchant_key.clone());
        fields.insert("order_id".to_string(), request.order_number.clone());
        fields.insert("amount".to_string(), request.amount_minor.to_string());
        fields.insert("currency".to_string(), request.currency.clone());
        fields.insert("description".to_string(), request.description.clone());
        fields.insert("callback_url".to_string(), request.callback_url.clone());
        fields.insert("return_url".to_string(), request.return_url.clone());
        if let Some(email) = &request.customer_email {
            fields.insert("customer_email".to_string(), email.clone());
        }
        fields.insert("token".to_string(), token.clone());

        info!(order_number = %request.order_number, "hosted form session prepared");

        Ok(SessionResponse {
            session_ref: token,
            redirect: RedirectInstructions::FormPost {
                action: self.config.payment_url.clone(),
                fields,
            },
        })
    }

    async fn poll_status(&self, request: StatusRequest) -> PaymentResult<StatusResponse> {
        let payload = serde_json::json!({
            "merchant_key": self.config.merchant_key,
            "order_id": request.order_number,
            "hash": self.sign(&[&self.config.merchant_key, &request.order_number]),
        });

        let raw: HostedFormStatusData = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/api/status"),
                None,
                Some(&payload),
                &[],
            )
            .await?;

        Ok(StatusResponse {
            status: map_status(&raw.status),
            transaction_ref: raw.transaction_id.filter(|v| !v.is_empty()),
            provider_data: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let amount = request.amount_minor.to_string();
        let payload = serde_json::json!({
            "merchant_key": self.config.merchant_key,
            "order_id": request.order_number,
            "transaction_id": request.transaction_ref,
            "amount": amount,
            "currency": request.currency,
            "reason": request.reason,
            "reference": request.idempotency_key,
            "hash": self.sign(&[
                &self.config.merchant_key,
                &request.order_number,
                &amount,
                &request.idempotency_key,
            ]),
        });

        let raw = self
            .http
            .request_raw(
                reqwest::Method::POST,
                &self.endpoint("/api/refund"),
                None,
                Some(&payload),
                &[],
            )
            .await?;

        let parsed: HostedFormRefundData =
            serde_json::from_value(raw.clone()).map_err(|e| PaymentError::ProviderError {
                provider: ProviderName::HostedForm.to_string(),
                message: format!("unexpected refund response: {}", e),
                provider_code: None,
                retryable: false,
            })?;

        match parsed.status.trim().to_lowercase().as_str() {
            "success" | "approved" | "refunded" => Ok(RefundResponse {
                provider_reference: parsed.refund_id,
                raw,
            }),
            other => {
                warn!(
                    order_number = %request.order_number,
                    status = other,
                    "hosted form refund declined"
                );
                Err(PaymentError::PaymentDeclinedError {
                    message: parsed
                        .message
                        .unwrap_or_else(|| format!("refund {}", other)),
                    provider_code: Some(other.to_string()),
                })
            }
        }
    }

    fn name(&self) -> ProviderName {
        ProviderName::HostedForm
    }

    fn callback_ips(&self) -> &[IpAddr] {
        &self.config.callback_ips
    }

    fn verify_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult> {
        let callback = match decode_callback(headers, body) {
            Ok(callback) => callback,
            Err(e) => {
                return Ok(WebhookVerificationResult {
                    valid: false,
                    reason: Some(e.to_string()),
                })
            }
        };
        if callback.hash.is_empty() {
            return Ok(WebhookVerificationResult {
                valid: false,
                reason: Some("missing hash".to_string()),
            });
        }

        let message = format!(
            "{}{}{}{}",
            self.config.merchant_key, callback.order_id, callback.status, callback.transaction_id
        );
        let valid = verify_hmac_sha256_hex(
            self.secret_key.as_bytes(),
            message.as_bytes(),
            &callback.hash,
        );
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid hosted form hash".to_string())
            },
        })
    }

    fn parse_callback(&self, headers: &HeaderMap, body: &[u8]) -> PaymentResult<CallbackPayload> {
        let callback = decode_callback(headers, body)?;
        let order_ref = OrderRef::parse(&callback.order_id).ok_or(PaymentError::ValidationError {
            message: "callback order_id is empty".to_string(),
            field: Some("order_id".to_string()),
        })?;

        Ok(CallbackPayload {
            order_ref,
            status: (!callback.status.is_empty()).then(|| map_status(&callback.status)),
            transaction_ref: (!callback.transaction_id.is_empty())
                .then_some(callback.transaction_id),
        })
    }
}

#[derive(Debug, Deserialize)]
struct HostedFormStatusData {
    status: String,
    #[serde(default)]
    transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostedFormRefundData {
    status: String,
    #[serde(default)]
    refund_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}
