use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PaymentsConfig;
use crate::database::error::DatabaseError;
use crate::database::store::OrderStore;
use crate::models::Order;
use crate::payments::error::PaymentError;
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::types::StatusRequest;
use crate::services::reconciliation::{ReconcileError, ReconcileOutcome, ReconciliationEngine};
use crate::services::retry::RetryExecutor;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failures for a single stale order. Logged, never propagated past the cycle.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("order {order_id} has no payment provider on record")]
    NoProvider { order_id: i64 },

    #[error("provider {provider} is not configured")]
    UnknownProvider { provider: String },

    #[error("status poll failed: {0}")]
    Poll(#[from] PaymentError),

    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionSweeperConfig {
    pub interval: Duration,
    /// Orders untouched in `processing` for longer than this are polled.
    pub stale_after: Duration,
    pub batch_size: i64,
}

impl Default for SessionSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(900),
            batch_size: 50,
        }
    }
}

impl SessionSweeperConfig {
    pub fn from_payments(config: &PaymentsConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweeper_interval_secs),
            stale_after: Duration::from_secs(config.sweeper_stale_after_secs),
            batch_size: config.sweeper_batch_size,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub applied: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Recovers payments whose callback never arrived by polling the gateway.
pub struct SessionSweeper {
    store: Arc<dyn OrderStore>,
    factory: Arc<PaymentProviderFactory>,
    engine: Arc<ReconciliationEngine>,
    retry: RetryExecutor,
    config: SessionSweeperConfig,
}

impl SessionSweeper {
    pub fn new(
        store: Arc<dyn OrderStore>,
        factory: Arc<PaymentProviderFactory>,
        engine: Arc<ReconciliationEngine>,
        retry: RetryExecutor,
        config: SessionSweeperConfig,
    ) -> Self {
        Self {
            store,
            factory,
            engine,
            retry,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            batch_size = self.config.batch_size,
            "session sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("session sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "session sweep cycle failed");
                    }
                }
            }
        }

        info!("session sweeper stopped");
    }

    pub async fn run_cycle(&self) -> Result<SweepSummary, DatabaseError> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let cutoff = Utc::now() - stale_after;
        let orders = self
            .store
            .find_stale_processing(cutoff, self.config.batch_size)
            .await?;

        let mut summary = SweepSummary {
            examined: orders.len(),
            ..SweepSummary::default()
        };
        if orders.is_empty() {
            debug!("no stale payment sessions");
            return Ok(summary);
        }

        for order in orders {
            match self.sweep_order(&order).await {
                Ok(outcome) => {
                    if outcome.is_applied() {
                        summary.applied += 1;
                    }
                    info!(
                        order_id = order.id,
                        order_number = %order.order_number,
                        outcome = ?outcome,
                        "stale session reconciled"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        order_id = order.id,
                        order_number = %order.order_number,
                        error = %e,
                        "stale session sweep failed"
                    );
                }
            }
        }

        info!(
            examined = summary.examined,
            applied = summary.applied,
            failed = summary.failed,
            "session sweep cycle complete"
        );
        Ok(summary)
    }

    async fn sweep_order(&self, order: &Order) -> Result<ReconcileOutcome, SweepError> {
        let provider = order
            .payment_method
            .as_deref()
            .ok_or(SweepError::NoProvider { order_id: order.id })?;
        let gateway = self
            .factory
            .get_by_name(provider)
            .map_err(|_| SweepError::UnknownProvider {
                provider: provider.to_string(),
            })?;

        let request = StatusRequest {
            order_number: order.order_number.clone(),
            session_ref: order.payment_intent_id.clone(),
        };
        let gateway = gateway.as_ref();
        let response = self
            .retry
            .run("sweep_poll_status", PaymentError::is_retryable, move || {
                gateway.poll_status(request.clone())
            })
            .await?;

        Ok(self
            .engine
            .reconcile(order.id, &response.status, response.transaction_ref)
            .await?)
    }
}
