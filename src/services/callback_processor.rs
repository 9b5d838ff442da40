//! Callback Receiver: authenticates a gateway notification, resolves the
//! order and hands the mapped status to the Reconciliation Engine.

use http::HeaderMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::store::OrderStore;
use crate::error::{AppError, AppErrorKind, DomainError, SecurityError, ValidationError};
use crate::models::{Order, OrderRef};
use crate::payments::error::PaymentError;
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::provider::PaymentGateway;
use crate::payments::security::CallbackIpPolicy;
use crate::payments::types::{CallbackStatus, StatusRequest};
use crate::services::reconciliation::{
    IgnoreReason, ReconcileError, ReconcileOutcome, ReconciliationEngine,
};
use crate::services::retry::RetryExecutor;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("callback for {provider} from disallowed address {source_ip}")]
    ForbiddenSource { provider: String, source_ip: String },

    #[error("invalid {provider} callback signature: {reason}")]
    InvalidSignature { provider: String, reason: String },

    #[error("malformed callback payload: {0}")]
    MalformedPayload(String),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<CallbackError> for AppError {
    fn from(err: CallbackError) -> Self {
        let kind = match err {
            CallbackError::UnsupportedProvider(provider) => {
                AppErrorKind::Domain(DomainError::UnsupportedProvider { provider })
            }
            CallbackError::ForbiddenSource {
                provider,
                source_ip,
            } => AppErrorKind::Security(SecurityError::ForbiddenSource {
                provider,
                source_ip,
            }),
            CallbackError::InvalidSignature { provider, reason } => {
                AppErrorKind::Security(SecurityError::InvalidSignature { provider, reason })
            }
            CallbackError::MalformedPayload(reason) => {
                AppErrorKind::Validation(ValidationError::MalformedPayload { reason })
            }
            CallbackError::OrderNotFound(order) => return AppError::not_found("Order", order),
            CallbackError::Store(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

/// What the receiver tells the gateway once the order was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    pub order_id: i64,
    pub order_number: String,
    pub outcome: ReconcileOutcome,
}

pub struct CallbackProcessor {
    factory: Arc<PaymentProviderFactory>,
    store: Arc<dyn OrderStore>,
    engine: Arc<ReconciliationEngine>,
    ip_policy: CallbackIpPolicy,
    retry: RetryExecutor,
}

impl CallbackProcessor {
    pub fn new(
        factory: Arc<PaymentProviderFactory>,
        store: Arc<dyn OrderStore>,
        engine: Arc<ReconciliationEngine>,
        ip_policy: CallbackIpPolicy,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            factory,
            store,
            engine,
            ip_policy,
            retry,
        }
    }

    pub async fn process(
        &self,
        provider: &str,
        headers: &HeaderMap,
        body: &[u8],
        peer: SocketAddr,
    ) -> Result<CallbackAck, CallbackError> {
        let gateway = self
            .factory
            .get_by_name(provider)
            .map_err(|_| CallbackError::UnsupportedProvider(provider.to_string()))?;
        let provider_name = gateway.name();

        let source = self.ip_policy.source_ip(headers, peer);
        if self
            .ip_policy
            .check(provider_name.as_str(), gateway.callback_ips(), source)
            .is_rejected()
        {
            return Err(CallbackError::ForbiddenSource {
                provider: provider_name.to_string(),
                source_ip: source.to_string(),
            });
        }

        let verification = gateway.verify_callback(headers, body).map_err(|e| {
            CallbackError::InvalidSignature {
                provider: provider_name.to_string(),
                reason: e.to_string(),
            }
        })?;
        if !verification.valid {
            warn!(
                provider = %provider_name,
                source_ip = %source,
                reason = ?verification.reason,
                "rejecting callback with invalid signature"
            );
            return Err(CallbackError::InvalidSignature {
                provider: provider_name.to_string(),
                reason: verification
                    .reason
                    .unwrap_or_else(|| "signature mismatch".to_string()),
            });
        }

        let payload = gateway
            .parse_callback(headers, body)
            .map_err(|e| CallbackError::MalformedPayload(e.to_string()))?;

        let order = self.resolve_order(&payload.order_ref).await?;
        info!(
            provider = %provider_name,
            order_id = order.id,
            order_number = %order.order_number,
            reported_status = ?payload.status,
            "callback received"
        );

        if let Some(method) = order.payment_method.as_deref() {
            if method != provider_name.as_str() {
                warn!(
                    order_id = order.id,
                    order_provider = method,
                    callback_provider = %provider_name,
                    "callback provider differs from the order's recorded provider"
                );
            }
        }

        let (status, transaction_ref) = match payload.status {
            Some(status) => (status, payload.transaction_ref),
            None => match self.poll(gateway.as_ref(), &order).await {
                Ok((status, polled_ref)) => (status, payload.transaction_ref.or(polled_ref)),
                Err(e) => {
                    warn!(
                        order_id = order.id,
                        provider = %provider_name,
                        error = %e,
                        "status poll failed, deferring reconciliation"
                    );
                    return Ok(self.ack(
                        &order,
                        ReconcileOutcome::Ignored(IgnoreReason::Deferred {
                            detail: e.to_string(),
                        }),
                    ));
                }
            },
        };

        let outcome = match self
            .engine
            .reconcile(order.id, &status, transaction_ref)
            .await
        {
            Ok(outcome) => outcome,
            Err(ReconcileError::OrderNotFound { order_id }) => {
                return Err(CallbackError::OrderNotFound(order_id.to_string()))
            }
            Err(ReconcileError::Store(e)) => {
                error!(
                    order_id = order.id,
                    error = %e,
                    "reconciliation failed, acknowledging for redelivery or sweep"
                );
                ReconcileOutcome::Ignored(IgnoreReason::Deferred {
                    detail: e.to_string(),
                })
            }
        };

        Ok(self.ack(&order, outcome))
    }

    async fn resolve_order(&self, order_ref: &OrderRef) -> Result<Order, CallbackError> {
        let found = match order_ref {
            OrderRef::Id(id) => self.store.find_order(*id).await?,
            OrderRef::Number(number) => self.store.find_order_by_number(number).await?,
        };
        found.ok_or_else(|| CallbackError::OrderNotFound(order_ref.to_string()))
    }

    async fn poll(
        &self,
        gateway: &dyn PaymentGateway,
        order: &Order,
    ) -> Result<(CallbackStatus, Option<String>), PaymentError> {
        let request = StatusRequest {
            order_number: order.order_number.clone(),
            session_ref: order.payment_intent_id.clone(),
        };
        let response = self
            .retry
            .run("poll_status", PaymentError::is_retryable, move || {
                gateway.poll_status(request.clone())
            })
            .await?;
        Ok((response.status, response.transaction_ref))
    }

    fn ack(&self, order: &Order, outcome: ReconcileOutcome) -> CallbackAck {
        CallbackAck {
            order_id: order.id,
            order_number: order.order_number.clone(),
            outcome,
        }
    }
}
