use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::{BigDecimal, Json};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::database::error::DatabaseError;
use crate::database::store::{OrderStore, StoreResult};
use crate::models::money::major_to_minor;
use crate::models::{
    Booking, CustomTourOrder, FrozenComponent, Guide, GuideHireRequest, Order, OrderKind,
    OrderStatus, PaymentStatus, PaymentStatusUpdate, RefundCompletion, RefundDraft, RefundLedger,
    RefundLog, RefundLogStatus, RefundRejection, RefundReservation, RequestStatus, TourComponent,
    TransferRequest,
};

const ORDER_COLUMNS: &str = "id, order_number, kind, subject_id, customer_email, total_amount, \
     currency, status, payment_status, payment_method, payment_intent_id, \
     gateway_transaction_id, created_at, updated_at";

const REFUND_LOG_COLUMNS: &str = "id, order_id, amount_minor, currency, status, reason, processed_by, \
     provider, provider_reference, gateway_response, created_at, updated_at";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: i64,
    order_number: String,
    kind: String,
    subject_id: i64,
    customer_email: Option<String>,
    total_amount: BigDecimal,
    currency: String,
    status: String,
    payment_status: String,
    payment_method: Option<String>,
    payment_intent_id: Option<String>,
    gateway_transaction_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<OrderKind>()
            .map_err(|e| DatabaseError::decode(format!("orders.kind: {}", e)))?;
        let status = OrderStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::decode(format!("orders.status: unknown value {}", row.status))
        })?;
        let payment_status = PaymentStatus::from_db_status(&row.payment_status).ok_or_else(|| {
            DatabaseError::decode(format!(
                "orders.payment_status: unknown value {}",
                row.payment_status
            ))
        })?;

        Ok(Order {
            id: row.id,
            order_number: row.order_number,
            kind,
            subject_id: row.subject_id,
            customer_email: row.customer_email,
            total_amount: to_minor(&row.total_amount, "orders.total_amount")?,
            currency: row.currency,
            status,
            payment_status,
            payment_method: row.payment_method,
            payment_intent_id: row.payment_intent_id,
            gateway_transaction_id: row.gateway_transaction_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct RefundLogRow {
    id: i64,
    order_id: i64,
    amount_minor: i64,
    currency: String,
    status: String,
    reason: String,
    processed_by: String,
    provider: String,
    provider_reference: Option<String>,
    gateway_response: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RefundLogRow> for RefundLog {
    type Error = DatabaseError;

    fn try_from(row: RefundLogRow) -> Result<Self, Self::Error> {
        let status = RefundLogStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::decode(format!("refund_logs.status: unknown value {}", row.status))
        })?;
        Ok(RefundLog {
            id: row.id,
            order_id: row.order_id,
            amount_minor: row.amount_minor,
            currency: row.currency,
            status,
            reason: row.reason,
            processed_by: row.processed_by,
            provider: row.provider,
            provider_reference: row.provider_reference,
            gateway_response: row.gateway_response,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct GuideRow {
    id: i64,
    name: String,
    email: Option<String>,
    price_per_day: Option<BigDecimal>,
}

#[derive(Debug, Clone, FromRow)]
struct GuideHireRequestRow {
    id: i64,
    guide_id: i64,
    number_of_days: i32,
    status: String,
}

#[derive(Debug, Clone, FromRow)]
struct TransferRequestRow {
    id: i64,
    driver_email: Option<String>,
    final_price: Option<BigDecimal>,
    estimated_price: Option<BigDecimal>,
    status: String,
}

#[derive(Debug, Clone, FromRow)]
struct CustomTourOrderRow {
    id: i64,
    components: Json<Vec<FrozenComponent>>,
    status: String,
}

#[derive(Debug, Clone, FromRow)]
struct TourComponentRow {
    id: i64,
    name: String,
    price: BigDecimal,
    is_active: bool,
}

#[derive(Debug, Clone, FromRow)]
struct BookingRow {
    id: i64,
    order_id: i64,
    created_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            order_id: row.order_id,
            created_at: row.created_at,
        }
    }
}

fn to_minor(value: &BigDecimal, column: &str) -> Result<i64, DatabaseError> {
    major_to_minor(value)
        .ok_or_else(|| DatabaseError::decode(format!("{}: {} out of range", column, value)))
}

fn to_minor_opt(value: Option<&BigDecimal>, column: &str) -> Result<Option<i64>, DatabaseError> {
    value.map(|v| to_minor(v, column)).transpose()
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// PostgreSQL-backed [`OrderStore`]. Catalogue and order amounts are
/// `NUMERIC(12,2)` major units in the database and minor units everywhere
/// else; refund logs store `amount_minor` directly.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_order(
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
    ) -> Result<Order, DatabaseError> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1 FOR UPDATE", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("Order", order_id))?;
        Order::try_from(row)
    }

    async fn refund_logs_in(
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
    ) -> Result<Vec<RefundLog>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM refund_logs WHERE order_id = $1 ORDER BY created_at, id",
            REFUND_LOG_COLUMNS
        );
        sqlx::query_as::<_, RefundLogRow>(&sql)
            .bind(order_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(RefundLog::try_from)
            .collect()
    }

    /// Distinguishes "guard failed" from "no such order" after a conditional
    /// update matched nothing.
    async fn ensure_order_exists(&self, order_id: i64) -> Result<(), DatabaseError> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        match exists {
            Some(_) => Ok(()),
            None => Err(DatabaseError::not_found("Order", order_id)),
        }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn find_order(&self, id: i64) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE order_number = $1", ORDER_COLUMNS);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_guide_hire_request(&self, id: i64) -> StoreResult<Option<GuideHireRequest>> {
        let row = sqlx::query_as::<_, GuideHireRequestRow>(
            "SELECT id, guide_id, number_of_days, status FROM guide_hire_requests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|r| GuideHireRequest {
            id: r.id,
            guide_id: r.guide_id,
            number_of_days: i64::from(r.number_of_days),
            status: RequestStatus::parse(&r.status),
        }))
    }

    async fn find_guide(&self, id: i64) -> StoreResult<Option<Guide>> {
        let row = sqlx::query_as::<_, GuideRow>(
            "SELECT id, name, email, price_per_day FROM guides WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(|r| {
            Ok(Guide {
                price_per_day: to_minor_opt(r.price_per_day.as_ref(), "guides.price_per_day")?,
                id: r.id,
                name: r.name,
                email: r.email,
            })
        })
        .transpose()
    }

    async fn find_transfer_request(&self, id: i64) -> StoreResult<Option<TransferRequest>> {
        let row = sqlx::query_as::<_, TransferRequestRow>(
            "SELECT id, driver_email, final_price, estimated_price, status \
             FROM transfer_requests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(|r| {
            Ok(TransferRequest {
                final_price: to_minor_opt(r.final_price.as_ref(), "transfer_requests.final_price")?,
                estimated_price: to_minor_opt(
                    r.estimated_price.as_ref(),
                    "transfer_requests.estimated_price",
                )?,
                id: r.id,
                driver_email: r.driver_email,
                status: RequestStatus::parse(&r.status),
            })
        })
        .transpose()
    }

    async fn find_custom_tour_order(&self, id: i64) -> StoreResult<Option<CustomTourOrder>> {
        let row = sqlx::query_as::<_, CustomTourOrderRow>(
            "SELECT id, components, status FROM custom_tour_orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|r| CustomTourOrder {
            id: r.id,
            components: r.components.0,
            status: RequestStatus::parse(&r.status),
        }))
    }

    async fn find_active_components(&self, ids: &[i64]) -> StoreResult<Vec<TourComponent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, TourComponentRow>(
            "SELECT id, name, price, is_active FROM tour_components \
             WHERE id = ANY($1) AND is_active = TRUE",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter()
            .map(|r| {
                Ok(TourComponent {
                    price: to_minor(&r.price, "tour_components.price")?,
                    id: r.id,
                    name: r.name,
                    is_active: r.is_active,
                })
            })
            .collect()
    }

    async fn record_session(
        &self,
        order_id: i64,
        provider: &str,
        session_ref: &str,
    ) -> StoreResult<Option<Order>> {
        let sql = format!(
            "UPDATE orders \
             SET payment_method = $2, payment_intent_id = $3, \
                 payment_status = 'processing', updated_at = NOW() \
             WHERE id = $1 AND payment_status IN ('unpaid', 'processing') \
             RETURNING {}",
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(provider)
            .bind(session_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => Ok(Some(Order::try_from(row)?)),
            None => {
                self.ensure_order_exists(order_id).await?;
                Ok(None)
            }
        }
    }

    async fn compare_and_set_payment_status(
        &self,
        order_id: i64,
        expected: PaymentStatus,
        update: PaymentStatusUpdate,
    ) -> StoreResult<Option<Order>> {
        let sql = format!(
            "UPDATE orders \
             SET payment_status = $3, \
                 status = COALESCE($4, status), \
                 gateway_transaction_id = COALESCE($5, gateway_transaction_id), \
                 updated_at = NOW() \
             WHERE id = $1 AND payment_status = $2 \
             RETURNING {}",
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(expected.as_str())
            .bind(update.payment_status.as_str())
            .bind(update.status.map(|s| s.as_str()))
            .bind(update.gateway_transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => Ok(Some(Order::try_from(row)?)),
            None => {
                self.ensure_order_exists(order_id).await?;
                Ok(None)
            }
        }
    }

    async fn reserve_refund(
        &self,
        order_id: i64,
        draft: RefundDraft,
    ) -> StoreResult<Result<RefundReservation, RefundRejection>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let order = Self::lock_order(&mut tx, order_id).await?;
        let logs = Self::refund_logs_in(&mut tx, order_id).await?;
        let ledger = RefundLedger::from_logs(logs.iter());

        let amount = match ledger.plan(&order, draft.requested_amount) {
            Ok(amount) => amount,
            Err(rejection) => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(Err(rejection));
            }
        };

        let sql = format!(
            "INSERT INTO refund_logs \
             (order_id, amount_minor, currency, status, reason, processed_by, provider) \
             VALUES ($1, $2, $3, 'pending', $4, $5, $6) \
             RETURNING {}",
            REFUND_LOG_COLUMNS
        );
        let row = sqlx::query_as::<_, RefundLogRow>(&sql)
            .bind(order_id)
            .bind(amount)
            .bind(&order.currency)
            .bind(&draft.reason)
            .bind(&draft.processed_by)
            .bind(order.payment_method.as_deref().unwrap_or_default())
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let log = RefundLog::try_from(row)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

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
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let order_id: i64 = sqlx::query_scalar("SELECT order_id FROM refund_logs WHERE id = $1")
            .bind(refund_log_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("RefundLog", refund_log_id))?;

        // Order lock first, same order as reserve_refund.
        let order = Self::lock_order(&mut tx, order_id).await?;

        let sql = format!(
            "SELECT {} FROM refund_logs WHERE id = $1 FOR UPDATE",
            REFUND_LOG_COLUMNS
        );
        let current = sqlx::query_as::<_, RefundLogRow>(&sql)
            .bind(refund_log_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let current = RefundLog::try_from(current)?;

        let log = match current.status {
            RefundLogStatus::Pending => {
                let sql = format!(
                    "UPDATE refund_logs \
                     SET status = 'success', provider_reference = $2, \
                         gateway_response = $3, updated_at = NOW() \
                     WHERE id = $1 \
                     RETURNING {}",
                    REFUND_LOG_COLUMNS
                );
                let row = sqlx::query_as::<_, RefundLogRow>(&sql)
                    .bind(refund_log_id)
                    .bind(provider_reference)
                    .bind(gateway_response)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(DatabaseError::from_sqlx)?;
                RefundLog::try_from(row)?
            }
            RefundLogStatus::Success => current,
            RefundLogStatus::Failed => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Err(DatabaseError::invalid_state(format!(
                    "refund log {} is already failed",
                    refund_log_id
                )));
            }
        };

        let refunded_total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_minor), 0)::BIGINT FROM refund_logs \
             WHERE order_id = $1 AND status = 'success'",
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let next = RefundLedger::status_after(order.total_amount, refunded_total);
        let order = if order.payment_status.can_transition_to(next) {
            let sql = format!(
                "UPDATE orders SET payment_status = $2, updated_at = NOW() \
                 WHERE id = $1 RETURNING {}",
                ORDER_COLUMNS
            );
            let row = sqlx::query_as::<_, OrderRow>(&sql)
                .bind(order_id)
                .bind(next.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            Order::try_from(row)?
        } else {
            order
        };

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(RefundCompletion {
            log,
            order,
            refunded_total,
        })
    }

    async fn fail_refund(
        &self,
        refund_log_id: i64,
        gateway_response: serde_json::Value,
    ) -> StoreResult<RefundLog> {
        let sql = format!(
            "UPDATE refund_logs \
             SET status = 'failed', gateway_response = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {}",
            REFUND_LOG_COLUMNS
        );
        let row = sqlx::query_as::<_, RefundLogRow>(&sql)
            .bind(refund_log_id)
            .bind(gateway_response)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => RefundLog::try_from(row),
            None => {
                let status: Option<String> =
                    sqlx::query_scalar("SELECT status FROM refund_logs WHERE id = $1")
                        .bind(refund_log_id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(DatabaseError::from_sqlx)?;
                match status {
                    Some(status) => Err(DatabaseError::invalid_state(format!(
                        "refund log {} is already {}",
                        refund_log_id, status
                    ))),
                    None => Err(DatabaseError::not_found("RefundLog", refund_log_id)),
                }
            }
        }
    }

    async fn list_refund_logs(&self, order_id: i64) -> StoreResult<Vec<RefundLog>> {
        let sql = format!(
            "SELECT {} FROM refund_logs WHERE order_id = $1 ORDER BY created_at, id",
            REFUND_LOG_COLUMNS
        );
        sqlx::query_as::<_, RefundLogRow>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(RefundLog::try_from)
            .collect()
    }

    async fn create_booking_if_absent(&self, order_id: i64) -> StoreResult<(Booking, bool)> {
        let inserted = sqlx::query_as::<_, BookingRow>(
            "INSERT INTO bookings (order_id) VALUES ($1) \
             ON CONFLICT (order_id) DO NOTHING \
             RETURNING id, order_id, created_at",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }

        let existing = sqlx::query_as::<_, BookingRow>(
            "SELECT id, order_id, created_at FROM bookings WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok((existing.into(), false))
    }

    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders \
             WHERE payment_status = 'processing' AND updated_at < $1 \
             ORDER BY updated_at \
             LIMIT $2",
            ORDER_COLUMNS
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        crate::database::health_check(&self.pool).await
    }
}
