//! Work that follows a committed payment transition: booking creation and
//! notifications. Producers hand effects off through a bounded queue and
//! never wait for them.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::database::store::OrderStore;
use crate::models::{Order, OrderKind, PaymentStatus};
use crate::services::notification::{Audience, Notification, NotificationType, Notifier};
use crate::services::retry::RetryExecutor;

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// A callback or sweep moved the order's payment status.
    PaymentTransition { order: Order, from: PaymentStatus },
    /// An admin refund settled with the gateway.
    RefundCompleted { order: Order, amount_minor: i64 },
}

impl SideEffect {
    pub fn order(&self) -> &Order {
        match self {
            SideEffect::PaymentTransition { order, .. } => order,
            SideEffect::RefundCompleted { order, .. } => order,
        }
    }
}

/// Sending half of the side-effect queue.
#[derive(Clone)]
pub struct SideEffectDispatcher {
    tx: mpsc::Sender<SideEffect>,
}

impl SideEffectDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SideEffect>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues `effect` without waiting. Returns false when it was dropped.
    pub fn dispatch(&self, effect: SideEffect) -> bool {
        let order_id = effect.order().id;
        match self.tx.try_send(effect) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!(order_id, "side-effect queue full, dropping effect");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(order_id, "side-effect queue closed, dropping effect");
                false
            }
        }
    }
}

/// Executes side effects. Every failure is logged and swallowed.
pub struct SideEffectHandler {
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryExecutor,
}

impl SideEffectHandler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            store,
            notifier,
            retry,
        }
    }

    pub async fn handle(&self, effect: SideEffect) {
        match effect {
            SideEffect::PaymentTransition { order, from } => match order.payment_status {
                PaymentStatus::Paid => {
                    if order.kind.creates_booking() {
                        self.create_booking(&order).await;
                    }
                    self.notify_all(&order, NotificationType::PaymentConfirmed, order.total_amount)
                        .await;
                }
                PaymentStatus::Failed => {
                    self.notify(
                        &order,
                        Audience::Customer,
                        order.customer_email.clone(),
                        NotificationType::PaymentFailed,
                        order.total_amount,
                    )
                    .await;
                }
                PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded => {
                    self.notify(
                        &order,
                        Audience::Customer,
                        order.customer_email.clone(),
                        NotificationType::RefundProcessed,
                        order.total_amount,
                    )
                    .await;
                }
                other => {
                    info!(
                        order_id = order.id,
                        from = %from,
                        to = %other,
                        "no side effects for transition"
                    );
                }
            },
            SideEffect::RefundCompleted {
                order,
                amount_minor,
            } => {
                self.notify(
                    &order,
                    Audience::Customer,
                    order.customer_email.clone(),
                    NotificationType::RefundProcessed,
                    amount_minor,
                )
                .await;
                self.notify(
                    &order,
                    Audience::Admin,
                    None,
                    NotificationType::RefundProcessed,
                    amount_minor,
                )
                .await;
            }
        }
    }

    async fn create_booking(&self, order: &Order) {
        let store = self.store.clone();
        let order_id = order.id;
        let result = self
            .retry
            .run(
                "create_booking",
                |e: &crate::database::error::DatabaseError| e.is_retryable(),
                || {
                    let store = store.clone();
                    async move { store.create_booking_if_absent(order_id).await }
                },
            )
            .await;

        match result {
            Ok((booking, true)) => {
                info!(order_id, booking_id = booking.id, "booking created");
            }
            Ok((booking, false)) => {
                info!(order_id, booking_id = booking.id, "booking already exists");
            }
            Err(e) => {
                error!(order_id, error = %e, "booking creation failed");
            }
        }
    }

    async fn notify_all(&self, order: &Order, notification_type: NotificationType, amount: i64) {
        self.notify(
            order,
            Audience::Customer,
            order.customer_email.clone(),
            notification_type,
            amount,
        )
        .await;
        self.notify(order, Audience::Admin, None, notification_type, amount)
            .await;

        if order.kind.has_partner() {
            let partner = self.partner_email(order).await;
            self.notify(order, Audience::Partner, partner, notification_type, amount)
                .await;
        }
    }

    async fn partner_email(&self, order: &Order) -> Option<String> {
        let lookup = match order.kind {
            OrderKind::GuideHire => match self.store.find_guide_hire_request(order.subject_id).await
            {
                Ok(Some(request)) => self
                    .store
                    .find_guide(request.guide_id)
                    .await
                    .map(|g| g.and_then(|g| g.email)),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            },
            OrderKind::Transfer => self
                .store
                .find_transfer_request(order.subject_id)
                .await
                .map(|t| t.and_then(|t| t.driver_email)),
            OrderKind::Tour | OrderKind::CustomTour => Ok(None),
        };

        lookup.unwrap_or_else(|e| {
            warn!(order_id = order.id, error = %e, "partner lookup failed");
            None
        })
    }

    async fn notify(
        &self,
        order: &Order,
        audience: Audience,
        recipient: Option<String>,
        notification_type: NotificationType,
        amount_minor: i64,
    ) {
        let notification = Notification {
            audience,
            notification_type,
            order_id: order.id,
            order_number: order.order_number.clone(),
            recipient,
            amount_minor,
            currency: order.currency.clone(),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(
                order_id = order.id,
                audience = ?audience,
                error = %e,
                "notification failed"
            );
        }
    }
}
