//! Refund Subsystem: reserves a refund against the order's ledger, submits it
//! to the gateway and settles the audit row.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::store::OrderStore;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::models::money::format_major;
use crate::models::{PaymentStatus, RefundDraft, RefundLog, RefundRejection};
use crate::payments::error::PaymentError;
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::types::RefundRequest;
use crate::services::retry::RetryExecutor;
use crate::services::side_effects::{SideEffect, SideEffectDispatcher};

const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct RefundCommand {
    pub order_id: i64,
    /// Minor units. `None` refunds whatever is left.
    pub amount: Option<i64>,
    pub reason: String,
    pub processed_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub refund_log_id: i64,
    pub amount: i64,
    pub new_payment_status: PaymentStatus,
    pub remaining: i64,
    pub provider_reference: Option<String>,
}

#[derive(Debug, Error)]
pub enum RefundError {
    #[error("invalid refund request: {field}: {reason}")]
    InvalidRequest { field: &'static str, reason: String },

    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("order {order_id} has no payment provider on record")]
    NoProvider { order_id: i64 },

    #[error("refund for order {order_id} rejected: {rejection}")]
    Rejected {
        order_id: i64,
        rejection: RefundRejection,
    },

    #[error("gateway refused refund {refund_log_id}: {source}")]
    Gateway {
        refund_log_id: i64,
        #[source]
        source: PaymentError,
    },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<RefundError> for AppError {
    fn from(err: RefundError) -> Self {
        match err {
            RefundError::InvalidRequest { field, reason } => AppError::invalid_field(field, reason),
            RefundError::OrderNotFound(id) => AppError::not_found("Order", id),
            RefundError::NoProvider { order_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::RefundRejected {
                    order_id,
                    reason: "order was never sent to a payment provider".to_string(),
                }))
            }
            RefundError::Rejected {
                rejection: RefundRejection::InvalidAmount { requested },
                ..
            } => AppError::new(AppErrorKind::Domain(DomainError::InvalidAmount {
                amount: format_major(requested),
                reason: "refund amount must be greater than zero".to_string(),
            })),
            RefundError::Rejected {
                order_id,
                rejection,
            } => AppError::new(AppErrorKind::Domain(DomainError::RefundRejected {
                order_id,
                reason: rejection.to_string(),
            })),
            RefundError::Gateway { source, .. } => source.into(),
            RefundError::Store(e) => e.into(),
        }
    }
}

pub struct RefundService {
    store: Arc<dyn OrderStore>,
    factory: Arc<PaymentProviderFactory>,
    dispatcher: SideEffectDispatcher,
    retry: RetryExecutor,
}

impl RefundService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        factory: Arc<PaymentProviderFactory>,
        dispatcher: SideEffectDispatcher,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            store,
            factory,
            dispatcher,
            retry,
        }
    }

    pub async fn refund(&self, command: RefundCommand) -> Result<RefundReceipt, RefundError> {
        validate(&command)?;

        let order = self
            .store
            .find_order(command.order_id)
            .await?
            .ok_or(RefundError::OrderNotFound(command.order_id))?;
        let provider = order
            .payment_method
            .as_deref()
            .ok_or(RefundError::NoProvider { order_id: order.id })?;
        let gateway = self.factory.get_by_name(provider).map_err(|_| RefundError::NoProvider {
            order_id: order.id,
        })?;

        let reservation = self
            .store
            .reserve_refund(
                order.id,
                RefundDraft {
                    requested_amount: command.amount,
                    reason: command.reason.trim().to_string(),
                    processed_by: command.processed_by.trim().to_string(),
                },
            )
            .await?
            .map_err(|rejection| {
                warn!(
                    order_id = order.id,
                    requested = ?command.amount,
                    reason = %rejection,
                    "refund rejected by ledger"
                );
                RefundError::Rejected {
                    order_id: order.id,
                    rejection,
                }
            })?;

        let log_id = reservation.log.id;
        let amount = reservation.log.amount_minor;
        if let Some(requested) = command.amount {
            if requested > amount {
                info!(
                    order_id = order.id,
                    requested = %format_major(requested),
                    clamped = %format_major(amount),
                    "refund clamped to remaining balance"
                );
            }
        }

        let request = RefundRequest {
            order_number: reservation.order.order_number.clone(),
            session_ref: reservation.order.payment_intent_id.clone(),
            transaction_ref: reservation.order.gateway_transaction_id.clone(),
            amount_minor: amount,
            currency: reservation.log.currency.clone(),
            reason: reservation.log.reason.clone(),
            idempotency_key: format!("refund-{}-{}", order.id, log_id),
        };

        let gateway = gateway.as_ref();
        let submitted = self
            .retry
            .run("refund", PaymentError::is_safe_to_resend, move || {
                gateway.refund(request.clone())
            })
            .await;

        let response = match submitted {
            Ok(response) => response,
            Err(e) => {
                error!(
                    order_id = order.id,
                    refund_log_id = log_id,
                    error = %e,
                    "gateway refund failed"
                );
                let failure = serde_json::json!({
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                });
                if let Err(store_err) = self.store.fail_refund(log_id, failure).await {
                    error!(
                        refund_log_id = log_id,
                        error = %store_err,
                        "could not mark refund as failed, row stays pending"
                    );
                }
                return Err(RefundError::Gateway {
                    refund_log_id: log_id,
                    source: e,
                });
            }
        };

        let completion = self
            .store
            .complete_refund(log_id, response.provider_reference.clone(), response.raw)
            .await
            .map_err(|e| {
                error!(
                    order_id = order.id,
                    refund_log_id = log_id,
                    error = %e,
                    "gateway accepted refund but settling the audit row failed"
                );
                e
            })?;

        info!(
            order_id = order.id,
            refund_log_id = log_id,
            amount = %format_major(amount),
            refunded_total = %format_major(completion.refunded_total),
            payment_status = %completion.order.payment_status,
            processed_by = %completion.log.processed_by,
            "refund completed"
        );

        let new_payment_status = completion.order.payment_status;
        self.dispatcher.dispatch(SideEffect::RefundCompleted {
            order: completion.order,
            amount_minor: amount,
        });

        Ok(RefundReceipt {
            refund_log_id: log_id,
            amount,
            new_payment_status,
            remaining: reservation.remaining_after,
            provider_reference: response.provider_reference,
        })
    }

    pub async fn history(&self, order_id: i64) -> Result<Vec<RefundLog>, RefundError> {
        if self.store.find_order(order_id).await?.is_none() {
            return Err(RefundError::OrderNotFound(order_id));
        }
        Ok(self.store.list_refund_logs(order_id).await?)
    }
}

fn validate(command: &RefundCommand) -> Result<(), RefundError> {
    if command.order_id <= 0 {
        return Err(RefundError::InvalidRequest {
            field: "orderId",
            reason: "must be a positive id".to_string(),
        });
    }
    if let Some(amount) = command.amount {
        if amount <= 0 {
            return Err(RefundError::InvalidRequest {
                field: "amount",
                reason: "must be greater than zero".to_string(),
            });
        }
    }
    let reason = command.reason.trim();
    if reason.is_empty() {
        return Err(RefundError::InvalidRequest {
            field: "reason",
            reason: "is required".to_string(),
        });
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(RefundError::InvalidRequest {
            field: "reason",
            reason: format!("must be at most {} characters", MAX_REASON_LEN),
        });
    }
    if command.processed_by.trim().is_empty() {
        return Err(RefundError::InvalidRequest {
            field: "adminId",
            reason: "is required".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(amount: Option<i64>, reason: &str) -> RefundCommand {
        RefundCommand {
            order_id: 1,
            amount,
            reason: reason.to_string(),
            processed_by: "admin-7".to_string(),
        }
    }

    #[test]
    fn validation_rejects_blank_reason_and_non_positive_amount() {
        assert!(matches!(
            validate(&command(Some(100), "  ")),
            Err(RefundError::InvalidRequest { field: "reason", .. })
        ));
        assert!(matches!(
            validate(&command(Some(0), "damaged")),
            Err(RefundError::InvalidRequest { field: "amount", .. })
        ));
        assert!(validate(&command(None, "customer request")).is_ok());
    }

    #[test]
    fn ledger_rejections_map_to_conflict_and_bad_request() {
        let conflict: AppError = RefundError::Rejected {
            order_id: 1,
            rejection: RefundRejection::NothingRemaining,
        }
        .into();
        assert_eq!(conflict.status_code(), 409);

        let bad: AppError = RefundError::Rejected {
            order_id: 1,
            rejection: RefundRejection::InvalidAmount { requested: 0 },
        }
        .into();
        assert_eq!(bad.status_code(), 400);
    }
}
