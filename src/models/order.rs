use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What an order pays for. Stored as its own discriminant column; the
/// order-number prefix is only a display and legacy-compat concern.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Tour,
    GuideHire,
    Transfer,
    CustomTour,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Tour => "tour",
            OrderKind::GuideHire => "guide_hire",
            OrderKind::Transfer => "transfer",
            OrderKind::CustomTour => "custom_tour",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            OrderKind::Tour => "BT",
            OrderKind::GuideHire => "GUIDE",
            OrderKind::Transfer => "TRANSFER",
            OrderKind::CustomTour => "CUSTOM",
        }
    }

    /// Recognises both the current and the short legacy prefixes.
    pub fn from_order_number(order_number: &str) -> Option<Self> {
        let prefix = order_number.split('-').next()?.trim().to_uppercase();
        match prefix.as_str() {
            "BT" | "TOUR" => Some(OrderKind::Tour),
            "GH" | "GUIDE" => Some(OrderKind::GuideHire),
            "TR" | "TRANSFER" => Some(OrderKind::Transfer),
            "CT" | "CUSTOM" => Some(OrderKind::CustomTour),
            _ => None,
        }
    }

    /// `{PREFIX}-{created_at millis}-{id}`, e.g. `GUIDE-1700000000000-42`.
    pub fn order_number(&self, created_at: DateTime<Utc>, id: i64) -> String {
        format!("{}-{}-{}", self.prefix(), created_at.timestamp_millis(), id)
    }

    /// Paid orders of these kinds get a booking record.
    pub fn creates_booking(&self) -> bool {
        matches!(self, OrderKind::Tour | OrderKind::CustomTour)
    }

    /// Orders of these kinds have a guide or driver who is told about payment.
    pub fn has_partner(&self) -> bool {
        matches!(self, OrderKind::GuideHire | OrderKind::Transfer)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "tour" => Ok(OrderKind::Tour),
            "guide_hire" => Ok(OrderKind::GuideHire),
            "transfer" => Ok(OrderKind::Transfer),
            "custom_tour" => Ok(OrderKind::CustomTour),
            other => Err(format!("unknown order kind: {}", other)),
        }
    }
}

/// Payment lifecycle of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Processing,
    Paid,
    Failed,
    PartiallyRefunded,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Unpaid,
        PaymentStatus::Processing,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::PartiallyRefunded,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.trim().to_lowercase().as_str() {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "processing" => Some(PaymentStatus::Processing),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Every legal edge of the payment state machine.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Unpaid, Processing)
                | (Processing, Processing)
                | (Processing, Paid)
                | (Processing, Failed)
                | (Paid, PartiallyRefunded)
                | (Paid, Refunded)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    /// A repeated report of one of these states is a duplicate delivery.
    /// `PartiallyRefunded` is deliberately excluded: more refunds may follow.
    pub fn is_duplicate_safe_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    /// States from which a payment session may still be (re)created.
    pub fn accepts_new_session(&self) -> bool {
        matches!(self, PaymentStatus::Unpaid | PaymentStatus::Processing)
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Business lifecycle of an order, separate from its payment lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.trim().to_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a callback identifies its order. Only this part of a callback is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderRef {
    Id(i64),
    Number(String),
}

impl OrderRef {
    /// All-digit values are database ids, anything else is an order number.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        if value.chars().all(|c| c.is_ascii_digit()) {
            return value.parse::<i64>().ok().map(OrderRef::Id);
        }
        Some(OrderRef::Number(value.to_string()))
    }
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRef::Id(id) => write!(f, "{}", id),
            OrderRef::Number(number) => write!(f, "{}", number),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub kind: OrderKind,
    /// Id of the tour, guide hire request, transfer request or custom tour order.
    pub subject_id: i64,
    pub customer_email: Option<String>,
    /// Snapshot taken at checkout, in minor units. Never rewritten.
    pub total_amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub payment_intent_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written together with a payment status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatusUpdate {
    pub payment_status: PaymentStatus,
    pub status: Option<OrderStatus>,
    pub gateway_transaction_id: Option<String>,
}

impl PaymentStatusUpdate {
    /// Applies the callback-driven update for `target`; paid orders become confirmed.
    pub fn for_callback(target: PaymentStatus, transaction_ref: Option<String>) -> Self {
        Self {
            payment_status: target,
            status: (target == PaymentStatus::Paid).then_some(OrderStatus::Confirmed),
            gateway_transaction_id: transaction_ref,
        }
    }
}
