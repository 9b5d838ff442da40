//! Storage seam for the payment engine.
//!
//! Every write that guards a payment invariant is a single conditional
//! operation on the store side, so callers never hold a read across an await
//! and then write blindly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::error::DatabaseError;
use crate::models::{
    Booking, CustomTourOrder, Guide, GuideHireRequest, Order, PaymentStatus, PaymentStatusUpdate,
    RefundCompletion, RefundDraft, RefundLog, RefundRejection, RefundReservation, TourComponent,
    TransferRequest,
};

pub type StoreResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_order(&self, id: i64) -> StoreResult<Option<Order>>;

    async fn find_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>>;

    async fn find_guide_hire_request(&self, id: i64) -> StoreResult<Option<GuideHireRequest>>;

    async fn find_guide(&self, id: i64) -> StoreResult<Option<Guide>>;

    async fn find_transfer_request(&self, id: i64) -> StoreResult<Option<TransferRequest>>;

    async fn find_custom_tour_order(&self, id: i64) -> StoreResult<Option<CustomTourOrder>>;

    /// Active components among `ids`. Inactive and unknown ids are left out.
    async fn find_active_components(&self, ids: &[i64]) -> StoreResult<Vec<TourComponent>>;

    /// Records the gateway session on an order still awaiting payment and moves
    /// it to `processing`. Returns `None` when the order is no longer payable.
    async fn record_session(
        &self,
        order_id: i64,
        provider: &str,
        session_ref: &str,
    ) -> StoreResult<Option<Order>>;

    /// Applies `update` only if the order's payment status still equals
    /// `expected`. Returns the updated order, or `None` when the guard failed.
    async fn compare_and_set_payment_status(
        &self,
        order_id: i64,
        expected: PaymentStatus,
        update: PaymentStatusUpdate,
    ) -> StoreResult<Option<Order>>;

    /// Under the order lock: checks the refund ledger and inserts a `pending`
    /// refund log. The outer error is a storage failure; the inner one a
    /// business rejection.
    async fn reserve_refund(
        &self,
        order_id: i64,
        draft: RefundDraft,
    ) -> StoreResult<Result<RefundReservation, RefundRejection>>;

    /// Marks a pending refund `success` and recomputes the order's payment
    /// status from the sum of successful refunds.
    async fn complete_refund(
        &self,
        refund_log_id: i64,
        provider_reference: Option<String>,
        gateway_response: serde_json::Value,
    ) -> StoreResult<RefundCompletion>;

    /// Marks a pending refund `failed`. The order is left untouched.
    async fn fail_refund(
        &self,
        refund_log_id: i64,
        gateway_response: serde_json::Value,
    ) -> StoreResult<RefundLog>;

    async fn list_refund_logs(&self, order_id: i64) -> StoreResult<Vec<RefundLog>>;

    /// Inserts the booking for an order unless one exists. The flag is true
    /// when this call created it.
    async fn create_booking_if_absent(&self, order_id: i64) -> StoreResult<(Booking, bool)>;

    /// Orders left in `processing` since before `cutoff`, oldest first.
    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>>;

    async fn health_check(&self) -> StoreResult<()>;
}
