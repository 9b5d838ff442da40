use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Created once per paid tour-typed order; `order_id` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub order_id: i64,
    pub created_at: DateTime<Utc>,
}
