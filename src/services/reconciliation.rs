//! Reconciliation Engine: turns gateway notifications into idempotent
//! payment-status transitions.
//!
//! Only the order id is taken from the caller. The order itself is always
//! re-read from the store, and the write is a conditional update guarded on
//! the status that was read. Losing that race means another delivery got
//! there first; the engine re-reads and decides again.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::error::DatabaseError;
use crate::database::store::OrderStore;
use crate::error::AppError;
use crate::models::{PaymentStatus, PaymentStatusUpdate};
use crate::payments::types::CallbackStatus;
use crate::services::retry::RetryExecutor;
use crate::services::side_effects::{SideEffect, SideEffectDispatcher};

pub const DEFAULT_MAX_ROUNDS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The gateway reported a status outside the known vocabulary.
    UnknownStatus { raw: String },
    /// The reported status is not reachable from the current one.
    IllegalTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// Every conditional update lost to a concurrent writer.
    Contended,
    /// The status could not be established or committed right now. The
    /// order stays where it is until a redelivery or the sweeper.
    Deferred { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    Duplicate {
        status: PaymentStatus,
    },
    Ignored(IgnoreReason),
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied { .. })
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("order {order_id} not found")]
    OrderNotFound { order_id: i64 },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::OrderNotFound { order_id } => AppError::not_found("Order", order_id),
            ReconcileError::Store(e) => e.into(),
        }
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn OrderStore>,
    dispatcher: SideEffectDispatcher,
    retry: RetryExecutor,
    max_rounds: u32,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        dispatcher: SideEffectDispatcher,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            store,
            dispatcher,
            retry,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub async fn reconcile(
        &self,
        order_id: i64,
        status: &CallbackStatus,
        transaction_ref: Option<String>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let target = match status {
            CallbackStatus::Known(target) => *target,
            CallbackStatus::Unknown(raw) => {
                // Still confirm the order exists so unknown orders get a 404.
                self.load(order_id).await?;
                warn!(order_id, status = %raw, "ignoring unknown gateway status");
                return Ok(ReconcileOutcome::Ignored(IgnoreReason::UnknownStatus {
                    raw: raw.clone(),
                }));
            }
        };

        for round in 1..=self.max_rounds {
            let order = self.load(order_id).await?;
            let current = order.payment_status;

            if current == target && current.is_duplicate_safe_terminal() {
                info!(
                    order_id,
                    status = %current,
                    "duplicate notification, order already in reported state"
                );
                return Ok(ReconcileOutcome::Duplicate { status: current });
            }

            if !current.can_transition_to(target) {
                info!(
                    order_id,
                    from = %current,
                    to = %target,
                    "ignoring notification that would move payment status backwards"
                );
                return Ok(ReconcileOutcome::Ignored(IgnoreReason::IllegalTransition {
                    from: current,
                    to: target,
                }));
            }

            let update = PaymentStatusUpdate::for_callback(target, transaction_ref.clone());
            let store = &self.store;
            let committed = self
                .retry
                .run("compare_and_set_payment_status", DatabaseError::is_retryable, || {
                    let update = update.clone();
                    async move {
                        store
                            .compare_and_set_payment_status(order_id, current, update)
                            .await
                    }
                })
                .await?;
            match committed {
                Some(updated) => {
                    info!(
                        order_id,
                        order_number = %updated.order_number,
                        from = %current,
                        to = %target,
                        round,
                        "payment status transition committed"
                    );
                    if target != PaymentStatus::Processing {
                        self.dispatcher.dispatch(SideEffect::PaymentTransition {
                            order: updated,
                            from: current,
                        });
                    }
                    return Ok(ReconcileOutcome::Applied {
                        from: current,
                        to: target,
                    });
                }
                None => {
                    debug!(
                        order_id,
                        expected = %current,
                        round,
                        "conditional update lost a race, re-reading order"
                    );
                }
            }
        }

        warn!(
            order_id,
            target = %target,
            rounds = self.max_rounds,
            "giving up after repeated concurrent updates"
        );
        Ok(ReconcileOutcome::Ignored(IgnoreReason::Contended))
    }

    async fn load(&self, order_id: i64) -> Result<crate::models::Order, ReconcileError> {
        let store = &self.store;
        self.retry
            .run("find_order", DatabaseError::is_retryable, || async move {
                store.find_order(order_id).await
            })
            .await?
            .ok_or(ReconcileError::OrderNotFound { order_id })
    }
}
