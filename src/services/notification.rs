use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::models::money::format_major;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Customer,
    Admin,
    /// The guide or driver attached to the order.
    Partner,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PaymentConfirmed,
    PaymentFailed,
    RefundProcessed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub audience: Audience,
    pub notification_type: NotificationType,
    pub order_id: i64,
    pub order_number: String,
    /// Email address, when the audience has one on record.
    pub recipient: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound message delivery. Fire-and-forget from the engine's point of view.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotificationError> {
        let amount = format_major(n.amount_minor);
        match n.notification_type {
            NotificationType::PaymentConfirmed => {
                info!(
                    audience = ?n.audience,
                    order_id = n.order_id,
                    order_number = %n.order_number,
                    recipient = ?n.recipient,
                    amount = %amount,
                    currency = %n.currency,
                    "🔔 NOTIFICATION: Payment Confirmed"
                );
            }
            NotificationType::PaymentFailed => {
                error!(
                    audience = ?n.audience,
                    order_id = n.order_id,
                    order_number = %n.order_number,
                    recipient = ?n.recipient,
                    "🔔 NOTIFICATION: Payment Failed"
                );
            }
            NotificationType::RefundProcessed => {
                info!(
                    audience = ?n.audience,
                    order_id = n.order_id,
                    order_number = %n.order_number,
                    recipient = ?n.recipient,
                    amount = %amount,
                    currency = %n.currency,
                    "🔔 NOTIFICATION: Refund Processed"
                );
            }
        }
        Ok(())
    }
}
