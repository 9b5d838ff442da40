//! In-process `OrderStore` for local runs and tests.
//!
//! A single mutex guards all tables, which gives every trait method the same
//! atomicity the PostgreSQL store gets from conditional updates and row locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::store::{OrderStore, StoreResult};
use crate::models::{
    Booking, CustomTourOrder, Guide, GuideHireRequest, Order, PaymentStatus, PaymentStatusUpdate,
    RefundCompletion, RefundDraft, RefundLedger, RefundLog, RefundLogStatus, RefundRejection,
    RefundReservation, TourComponent, TransferRequest,
};

#[derive(Default)]
struct Tables {
    orders: HashMap<i64, Order>,
    guides: HashMap<i64, Guide>,
    guide_hire_requests: HashMap<i64, GuideHireRequest>,
    transfer_requests: HashMap<i64, TransferRequest>,
    custom_tour_orders: HashMap<i64, CustomTourOrder>,
    components: HashMap<i64, TourComponent>,
    refund_logs: Vec<RefundLog>,
    bookings: HashMap<i64, Booking>,
    next_refund_log_id: i64,
    next_booking_id: i64,
    booking_failures: u32,
    status_write_failures: u32,
}

#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_order(&self, order: Order) {
        self.tables.lock().await.orders.insert(order.id, order);
    }

    pub async fn insert_guide(&self, guide: Guide) {
        self.tables.lock().await.guides.insert(guide.id, guide);
    }

    pub async fn insert_guide_hire_request(&self, request: GuideHireRequest) {
        self.tables
            .lock()
            .await
            .guide_hire_requests
            .insert(request.id, request);
    }

    pub async fn insert_transfer_request(&self, request: TransferRequest) {
        self.tables
            .lock()
            .await
            .transfer_requests
            .insert(request.id, request);
    }

    pub async fn insert_custom_tour_order(&self, order: CustomTourOrder) {
        self.tables
            .lock()
            .await
            .custom_tour_orders
            .insert(order.id, order);
    }

    pub async fn insert_component(&self, component: TourComponent) {
        self.tables
            .lock()
            .await
            .components
            .insert(component.id, component);
    }

    /// Changes a guide's daily rate, as a guide editing their profile would.
    pub async fn set_guide_price(&self, guide_id: i64, price_per_day: Option<i64>) {
        if let Some(guide) = self.tables.lock().await.guides.get_mut(&guide_id) {
            guide.price_per_day = price_per_day;
        }
    }

    pub async fn set_component_active(&self, component_id: i64, is_active: bool) {
        if let Some(component) = self.tables.lock().await.components.get_mut(&component_id) {
            component.is_active = is_active;
        }
    }

    /// Makes the next `count` booking writes fail with a connection error.
    pub async fn fail_next_booking_writes(&self, count: u32) {
        self.tables.lock().await.booking_failures = count;
    }

    pub async fn fail_next_status_writes(&self, count: u32) {
        self.tables.lock().await.status_write_failures = count;
    }

    pub async fn bookings_for(&self, order_id: i64) -> Vec<Booking> {
        self.tables
            .lock()
            .await
            .bookings
            .values()
            .filter(|b| b.order_id == order_id)
            .cloned()
            .collect()
    }

    pub async fn booking_count(&self) -> usize {
        self.tables.lock().await.bookings.len()
    }
}

fn apply_update(order: &mut Order, update: PaymentStatusUpdate) {
    order.payment_status = update.payment_status;
    if let Some(status) = update.status {
        order.status = status;
    }
    if let Some(transaction_ref) = update.gateway_transaction_id {
        order.gateway_transaction_id = Some(transaction_ref);
    }
    order.updated_at = Utc::now();
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_order(&self, id: i64) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn find_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        Ok(self
            .tables
            .lock()
            .await
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn find_guide_hire_request(&self, id: i64) -> StoreResult<Option<GuideHireRequest>> {
        Ok(self.tables.lock().await.guide_hire_requests.get(&id).cloned())
    }

    async fn find_guide(&self, id: i64) -> StoreResult<Option<Guide>> {
        Ok(self.tables.lock().await.guides.get(&id).cloned())
    }

    async fn find_transfer_request(&self, id: i64) -> StoreResult<Option<TransferRequest>> {
        Ok(self.tables.lock().await.transfer_requests.get(&id).cloned())
    }

    async fn find_custom_tour_order(&self, id: i64) -> StoreResult<Option<CustomTourOrder>> {
        Ok(self.tables.lock().await.custom_tour_orders.get(&id).cloned())
    }

    async fn find_active_components(&self, ids: &[i64]) -> StoreResult<Vec<TourComponent>> {
        let tables = self.tables.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.components.get(id))
            .filter(|c| c.is_active)
            .cloned()
            .collect())
    }

    async fn record_session(
        &self,
        order_id: i64,
        provider: &str,
        session_ref: &str,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.lock().await;
        let order = match tables.orders.get_mut(&order_id) {
            Some(order) => order,
            None => return Err(DatabaseError::not_found("Order", order_id)),
        };
        if !order.payment_status.accepts_new_session() {
            return Ok(None);
        }
        order.payment_method = Some(provider.to_string());
        order.payment_intent_id = Some(session_ref.to_string());
        order.payment_status = PaymentStatus::Processing;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn compare_and_set_payment_status(
        &self,
        order_id: i64,
        expected: PaymentStatus,
        update: PaymentStatusUpdate,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables.lock().await;
        if tables.status_write_failures > 0 {
            tables.status_write_failures -= 1;
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "injected status write failure".to_string(),
            }));
        }
        let order = match tables.orders.get_mut(&order_id) {
            Some(order) => order,
            None => return Err(DatabaseError::not_found("Order", order_id)),
        };
        if order.payment_status != expected {
            return Ok(None);
        }
        apply_update(order, update);
        Ok(Some(order.clone()))
    }

    async fn reserve_refund(
        &self,
        order_id: i64,
        draft: RefundDraft,
    ) -> StoreResult<Result<RefundReservation, RefundRejection>> {
        let mut tables = self.tables.lock().await;
        let order = tables
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Order", order_id))?;

        let ledger =
            RefundLedger::from_logs(tables.refund_logs.iter().filter(|l| l.order_id == order_id));
        let amount = match ledger.plan(&order, draft.requested_amount) {
            Ok(amount) => amount,
            Err(rejection) => return Ok(Err(rejection)),
        };

        tables.next_refund_log_id += 1;
        let now = Utc::now();
        let log = RefundLog {
            id: tables.next_refund_log_id,
            order_id,
            amount_minor: amount,
            currency: order.currency.clone(),
            status: RefundLogStatus::Pending,
            reason: draft.reason,
            processed_by: draft.processed_by,
            provider: order.payment_method.clone().unwrap_or_default(),
            provider_reference: None,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        };
        tables.refund_logs.push(log.clone());

        Ok(Ok(RefundReservation {
            remaining_after: ledger.remaining(order.total_amount) - amount,
            log,
            order,
        }))
    }

    async fn complete_refund(
        &self,
        refund_log_id: i64,
        provider_reference: Option<String>,
        gateway_response: serde_json::Value,
    ) -> StoreResult<RefundCompletion> {
        let mut tables = self.tables.lock().await;
        let log = tables
            .refund_logs
            .iter_mut()
            .find(|l| l.id == refund_log_id)
            .ok_or_else(|| DatabaseError::not_found("RefundLog", refund_log_id))?;
        match log.status {
            RefundLogStatus::Pending => {
                log.status = RefundLogStatus::Success;
                log.provider_reference = provider_reference;
                log.gateway_response = Some(gateway_response);
                log.updated_at = Utc::now();
            }
            RefundLogStatus::Success => {}
            RefundLogStatus::Failed => {
                return Err(DatabaseError::invalid_state(format!(
                    "refund log {} is already failed",
                    refund_log_id
                )));
            }
        }
        let log = log.clone();

        let refunded_total: i64 = tables
            .refund_logs
            .iter()
            .filter(|l| l.order_id == log.order_id && l.status == RefundLogStatus::Success)
            .map(|l| l.amount_minor)
            .sum();

        let order = tables
            .orders
            .get_mut(&log.order_id)
            .ok_or_else(|| DatabaseError::not_found("Order", log.order_id))?;
        let next = RefundLedger::status_after(order.total_amount, refunded_total);
        if order.payment_status.can_transition_to(next) {
            order.payment_status = next;
            order.updated_at = Utc::now();
        }

        Ok(RefundCompletion {
            order: order.clone(),
            log,
            refunded_total,
        })
    }

    async fn fail_refund(
        &self,
        refund_log_id: i64,
        gateway_response: serde_json::Value,
    ) -> StoreResult<RefundLog> {
        let mut tables = self.tables.lock().await;
        let log = tables
            .refund_logs
            .iter_mut()
            .find(|l| l.id == refund_log_id)
            .ok_or_else(|| DatabaseError::not_found("RefundLog", refund_log_id))?;
        if log.status != RefundLogStatus::Pending {
            return Err(DatabaseError::invalid_state(format!(
                "refund log {} is already {}",
                refund_log_id, log.status
            )));
        }
        log.status = RefundLogStatus::Failed;
        log.gateway_response = Some(gateway_response);
        log.updated_at = Utc::now();
        Ok(log.clone())
    }

    async fn list_refund_logs(&self, order_id: i64) -> StoreResult<Vec<RefundLog>> {
        let tables = self.tables.lock().await;
        let mut logs: Vec<RefundLog> = tables
            .refund_logs
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.created_at, l.id));
        Ok(logs)
    }

    async fn create_booking_if_absent(&self, order_id: i64) -> StoreResult<(Booking, bool)> {
        let mut tables = self.tables.lock().await;
        if tables.booking_failures > 0 {
            tables.booking_failures -= 1;
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "injected booking write failure".to_string(),
            }));
        }
        if let Some(existing) = tables.bookings.get(&order_id) {
            return Ok((existing.clone(), false));
        }
        if !tables.orders.contains_key(&order_id) {
            return Err(DatabaseError::not_found("Order", order_id));
        }
        tables.next_booking_id += 1;
        let booking = Booking {
            id: tables.next_booking_id,
            order_id,
            created_at: Utc::now(),
        };
        tables.bookings.insert(order_id, booking.clone());
        Ok((booking, true))
    }

    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        let tables = self.tables.lock().await;
        let mut stale: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.payment_status == PaymentStatus::Processing && o.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
