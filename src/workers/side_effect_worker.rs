use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::services::side_effects::{SideEffect, SideEffectHandler};

/// Consumes the side-effect queue one effect at a time.
pub struct SideEffectWorker {
    rx: mpsc::Receiver<SideEffect>,
    handler: SideEffectHandler,
}

impl SideEffectWorker {
    pub fn new(rx: mpsc::Receiver<SideEffect>, handler: SideEffectHandler) -> Self {
        Self { rx, handler }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("side-effect worker started");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("side-effect worker stopping");
                        break;
                    }
                }
                effect = self.rx.recv() => {
                    match effect {
                        Some(effect) => self.handler.handle(effect).await,
                        None => {
                            info!("side-effect queue closed");
                            break;
                        }
                    }
                }
            }
        }

        let drained = self.drain_pending().await;
        info!(drained, "side-effect worker stopped");
    }

    /// Handles everything already queued without waiting for more.
    pub async fn drain_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(effect) = self.rx.try_recv() {
            self.handler.handle(effect).await;
            handled += 1;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryOrderStore;
    use crate::models::{Order, OrderKind, OrderStatus, PaymentStatus};
    use crate::services::notification::LoggingNotifier;
    use crate::services::retry::RetryExecutor;
    use crate::services::side_effects::SideEffectDispatcher;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn paid_tour(id: i64) -> Order {
        let now = Utc::now();
        Order {
            id,
            order_number: OrderKind::Tour.order_number(now, id),
            kind: OrderKind::Tour,
            subject_id: 3,
            customer_email: Some("guest@example.com".to_string()),
            total_amount: 30_000,
            currency: "AED".to_string(),
            status: OrderStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            payment_method: Some("checkout_session".to_string()),
            payment_intent_id: Some("cs_1".to_string()),
            gateway_transaction_id: Some("pi_1".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn worker(
        store: Arc<InMemoryOrderStore>,
    ) -> (SideEffectWorker, SideEffectDispatcher) {
        let (dispatcher, rx) = SideEffectDispatcher::channel(8);
        let handler = SideEffectHandler::new(
            store,
            Arc::new(LoggingNotifier::new()),
            RetryExecutor::new(3, Duration::from_millis(1), Duration::from_millis(2)),
        );
        (SideEffectWorker::new(rx, handler), dispatcher)
    }

    #[tokio::test]
    async fn drained_paid_effects_create_one_booking() {
        let store = Arc::new(InMemoryOrderStore::new());
        store.insert_order(paid_tour(5)).await;
        let (mut worker, dispatcher) = worker(store.clone());

        for _ in 0..3 {
            dispatcher.dispatch(SideEffect::PaymentTransition {
                order: paid_tour(5),
                from: PaymentStatus::Processing,
            });
        }

        assert_eq!(worker.drain_pending().await, 3);
        assert_eq!(store.bookings_for(5).await.len(), 1);
    }

    #[tokio::test]
    async fn transient_booking_failure_is_retried() {
        let store = Arc::new(InMemoryOrderStore::new());
        store.insert_order(paid_tour(6)).await;
        store.fail_next_booking_writes(2).await;
        let (mut worker, dispatcher) = worker(store.clone());

        dispatcher.dispatch(SideEffect::PaymentTransition {
            order: paid_tour(6),
            from: PaymentStatus::Processing,
        });
        worker.drain_pending().await;

        assert_eq!(store.bookings_for(6).await.len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let store = Arc::new(InMemoryOrderStore::new());
        let (worker, _dispatcher) = worker(store);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(worker.run(shutdown_rx));
        shutdown_tx.send(true).expect("worker should be listening");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .expect("worker task should not panic");
    }
}
