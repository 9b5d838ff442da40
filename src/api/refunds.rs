use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::{json_rejection, tag_request, AppState};
use crate::error::AppError;
use crate::models::money::{major_to_minor, minor_to_major_f64};
use crate::models::{PaymentStatus, RefundLog};
use crate::services::refund::{RefundCommand, RefundReceipt};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRefundBody {
    pub order_id: i64,
    /// Major units. Omitted means refund the remainder.
    pub amount: Option<BigDecimal>,
    pub reason: String,
    pub admin_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub refund_log_id: i64,
    pub amount: f64,
    pub new_payment_status: PaymentStatus,
    pub remaining: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
}

impl From<RefundReceipt> for RefundResponse {
    fn from(receipt: RefundReceipt) -> Self {
        Self {
            refund_log_id: receipt.refund_log_id,
            amount: minor_to_major_f64(receipt.amount),
            new_payment_status: receipt.new_payment_status,
            remaining: minor_to_major_f64(receipt.remaining),
            provider_reference: receipt.provider_reference,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundHistoryResponse {
    pub order_id: i64,
    pub refunds: Vec<RefundLog>,
}

/// POST /api/admin/refunds
pub async fn create_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateRefundBody>, JsonRejection>,
) -> Result<Json<RefundResponse>, AppError> {
    let Json(body) = body.map_err(|r| tag_request(json_rejection(r), &headers))?;

    let amount = match &body.amount {
        Some(major) => Some(major_to_minor(major).ok_or_else(|| {
            tag_request(
                AppError::invalid_field("amount", "out of range"),
                &headers,
            )
        })?),
        None => None,
    };

    let receipt = state
        .refunds
        .refund(RefundCommand {
            order_id: body.order_id,
            amount,
            reason: body.reason,
            processed_by: body.admin_id,
        })
        .await
        .map_err(|e| tag_request(e.into(), &headers))?;

    Ok(Json(receipt.into()))
}

/// GET /api/admin/orders/{id}/refunds
pub async fn refund_history(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<RefundHistoryResponse>, AppError> {
    let refunds = state
        .refunds
        .history(order_id)
        .await
        .map_err(|e| tag_request(e.into(), &headers))?;

    Ok(Json(RefundHistoryResponse { order_id, refunds }))
}
