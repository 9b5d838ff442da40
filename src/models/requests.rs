//! Source records the pricing oracle recomputes an order's amount from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a guide hire, transfer or custom tour request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Quoted,
    Confirmed,
    Approved,
    Paid,
    Completed,
    Rejected,
    Cancelled,
    Other(String),
}

impl RequestStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pending" => RequestStatus::Pending,
            "quoted" => RequestStatus::Quoted,
            "confirmed" => RequestStatus::Confirmed,
            "approved" => RequestStatus::Approved,
            "paid" => RequestStatus::Paid,
            "completed" => RequestStatus::Completed,
            "rejected" => RequestStatus::Rejected,
            "cancelled" | "canceled" => RequestStatus::Cancelled,
            other => RequestStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Quoted => "quoted",
            RequestStatus::Confirmed => "confirmed",
            RequestStatus::Approved => "approved",
            RequestStatus::Paid => "paid",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Other(value) => value.as_str(),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guide {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    /// Daily rate in minor units; `None` when the guide never set one.
    pub price_per_day: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideHireRequest {
    pub id: i64,
    pub guide_id: i64,
    pub number_of_days: i64,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: i64,
    pub driver_email: Option<String>,
    pub final_price: Option<i64>,
    pub estimated_price: Option<i64>,
    pub status: RequestStatus,
}

impl TransferRequest {
    /// The agreed price once quoted, otherwise the estimate.
    pub fn effective_price(&self) -> Option<i64> {
        self.final_price.or(self.estimated_price)
    }
}

/// A component reference frozen into a custom tour at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenComponent {
    pub component_id: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTourOrder {
    pub id: i64,
    pub components: Vec<FrozenComponent>,
    pub status: RequestStatus,
}

impl CustomTourOrder {
    pub fn component_ids(&self) -> Vec<i64> {
        self.components.iter().map(|c| c.component_id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourComponent {
    pub id: i64,
    pub name: String,
    /// Unit price in minor units.
    pub price: i64,
    pub is_active: bool,
}
