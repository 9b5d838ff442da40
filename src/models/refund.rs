use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::models::order::{Order, PaymentStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundLogStatus {
    Pending,
    Success,
    Failed,
}

impl RefundLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundLogStatus::Pending => "pending",
            RefundLogStatus::Success => "success",
            RefundLogStatus::Failed => "failed",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.trim().to_lowercase().as_str() {
            "pending" => Some(RefundLogStatus::Pending),
            "success" => Some(RefundLogStatus::Success),
            "failed" => Some(RefundLogStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RefundLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit row. Rows are never deleted; only `pending` rows change status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundLog {
    pub id: i64,
    pub order_id: i64,
    pub amount_minor: i64,
    pub currency: String,
    pub status: RefundLogStatus,
    pub reason: String,
    pub processed_by: String,
    pub provider: String,
    pub provider_reference: Option<String>,
    pub gateway_response: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a new refund row needs before the gateway is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundDraft {
    /// `None` refunds the whole remainder.
    pub requested_amount: Option<i64>,
    pub reason: String,
    pub processed_by: String,
}

/// A refund that passed the ledger check and now has a `pending` row.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundReservation {
    pub log: RefundLog,
    pub order: Order,
    /// Remainder after this reservation is counted.
    pub remaining_after: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundCompletion {
    pub log: RefundLog,
    pub order: Order,
    pub refunded_total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefundRejection {
    #[error("order payment status {status} is not refundable")]
    NotRefundable { status: PaymentStatus },

    #[error("refund amount must be greater than zero")]
    InvalidAmount { requested: i64 },

    #[error("another refund of {in_flight} is still in flight")]
    RefundInFlight { in_flight: i64 },

    #[error("nothing left to refund")]
    NothingRemaining,
}

/// Refund totals for one order, read under the order lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefundLedger {
    /// Sum of `success` rows.
    pub succeeded: i64,
    /// Sum of `pending` rows.
    pub in_flight: i64,
}

impl RefundLedger {
    pub fn from_logs<'a>(logs: impl IntoIterator<Item = &'a RefundLog>) -> Self {
        logs.into_iter()
            .fold(RefundLedger::default(), |mut ledger, log| {
                match log.status {
                    RefundLogStatus::Success => ledger.succeeded += log.amount_minor,
                    RefundLogStatus::Pending => ledger.in_flight += log.amount_minor,
                    RefundLogStatus::Failed => {}
                }
                ledger
            })
    }

    pub fn remaining(&self, total: i64) -> i64 {
        total - self.succeeded - self.in_flight
    }

    /// Decides how much of `requested` may be refunded now. Requests above the
    /// remainder are clamped to it.
    pub fn plan(&self, order: &Order, requested: Option<i64>) -> Result<i64, RefundRejection> {
        if !order.payment_status.is_refundable() {
            return Err(RefundRejection::NotRefundable {
                status: order.payment_status,
            });
        }
        if let Some(amount) = requested {
            if amount <= 0 {
                return Err(RefundRejection::InvalidAmount { requested: amount });
            }
        }

        let remaining = self.remaining(order.total_amount);
        if remaining <= 0 {
            if self.in_flight > 0 {
                return Err(RefundRejection::RefundInFlight {
                    in_flight: self.in_flight,
                });
            }
            return Err(RefundRejection::NothingRemaining);
        }

        let amount = requested.unwrap_or(remaining).min(remaining);
        if amount <= 0 {
            return Err(RefundRejection::InvalidAmount { requested: amount });
        }
        Ok(amount)
    }

    /// Payment status once `refunded_total` has been successfully returned.
    pub fn status_after(total: i64, refunded_total: i64) -> PaymentStatus {
        if refunded_total >= total {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        }
    }
}
