use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CallbackPayload, ProviderName, RefundRequest, RefundResponse, SessionRequest,
    SessionResponse, StatusRequest, StatusResponse, WebhookVerificationResult,
};
use async_trait::async_trait;
use http::HeaderMap;
use std::net::IpAddr;

/// One external payment gateway. Implementations map their own status
/// vocabulary into `CallbackStatus` so nothing upstream sees provider strings.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<SessionResponse>;

    async fn poll_status(&self, request: StatusRequest) -> PaymentResult<StatusResponse>;

    /// A provider-side decline is `PaymentDeclinedError`.
    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse>;

    fn name(&self) -> ProviderName;

    /// Source addresses the provider sends callbacks from.
    fn callback_ips(&self) -> &[IpAddr];

    fn verify_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_callback(&self, headers: &HeaderMap, body: &[u8]) -> PaymentResult<CallbackPayload>;
}
