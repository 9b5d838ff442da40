use crate::payments::error::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Sha256, Sha512};
use std::time::Duration;
use tracing::{debug, warn};

/// Thin JSON client shared by the gateway adapters. Each call is a single
/// attempt; retry policy belongs to the caller.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    provider: &'static str,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
                request_sent: false,
            })?;

        Ok(Self {
            client,
            timeout,
            provider,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let raw = self
            .request_raw(method, url, bearer_token, body, additional_headers)
            .await?;
        serde_json::from_value::<T>(raw).map_err(|e| PaymentError::ProviderError {
            provider: self.provider.to_string(),
            message: format!("unexpected provider response shape: {}", e),
            provider_code: None,
            retryable: false,
        })
    }

    /// Sends one request and returns the decoded JSON body of a 2xx response.
    pub async fn request_raw(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<JsonValue> {
        let mut request = self.client.request(method.clone(), url);
        request = request.timeout(self.timeout);

        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        debug!(provider = self.provider, method = %method, url = %url, "sending provider request");

        let resp = request.send().await.map_err(|e| {
            let request_sent = !(e.is_connect() || e.is_builder());
            warn!(
                provider = self.provider,
                error = %e,
                request_sent,
                "provider request failed"
            );
            PaymentError::NetworkError {
                message: format!("provider request failed: {}", e),
                request_sent,
            }
        })?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = resp.text().await.map_err(|e| PaymentError::NetworkError {
            message: format!("failed to read provider response: {}", e),
            request_sent: true,
        })?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(JsonValue::Null);
            }
            return serde_json::from_str::<JsonValue>(&text).map_err(|e| {
                PaymentError::ProviderError {
                    provider: self.provider.to_string(),
                    message: format!("invalid provider JSON response: {}", e),
                    provider_code: None,
                    retryable: false,
                }
            });
        }

        if status.as_u16() == 429 {
            return Err(PaymentError::RateLimitError {
                message: "provider rate limit exceeded".to_string(),
                retry_after_seconds: retry_after,
            });
        }

        if status.is_server_error() {
            warn!(provider = self.provider, status = %status, "provider server error");
        }

        Err(PaymentError::ProviderError {
            provider: self.provider.to_string(),
            message: format!("HTTP {}: {}", status, text),
            provider_code: Some(status.as_u16().to_string()),
            retryable: status.is_server_error(),
        })
    }
}

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    // Any key length is valid for HMAC.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

pub fn hmac_sha512_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = match HmacSha512::new_from_slice(key) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha512_hex(secret.as_bytes(), payload);
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_lowercase().as_bytes(),
    )
}

pub fn verify_hmac_sha256_hex(key: &[u8], message: &[u8], signature: &str) -> bool {
    let computed = hmac_sha256_hex(key, message);
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_lowercase().as_bytes(),
    )
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
