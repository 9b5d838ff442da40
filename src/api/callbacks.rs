use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::info;

use super::{tag_request, AppState};
use crate::error::AppError;
use crate::services::reconciliation::ReconcileOutcome;

#[derive(Debug, Serialize)]
pub struct CallbackReceived {
    pub received: bool,
    pub outcome: ReconcileOutcome,
}

/// POST /api/payments/{provider}/callback
///
/// Acknowledged with 200 once the order is found, whatever the reconciliation
/// decided. Only authentication, parsing and lookup failures are surfaced.
pub async fn handle_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackReceived>, AppError> {
    let ack = state
        .callbacks
        .process(&provider, &headers, &body, peer)
        .await
        .map_err(|e| {
            tag_request(
                AppError::from(e).with_context(format!("{} callback", provider)),
                &headers,
            )
        })?;

    info!(
        provider = %provider,
        order_id = ack.order_id,
        order_number = %ack.order_number,
        outcome = ?ack.outcome,
        "callback acknowledged"
    );

    Ok(Json(CallbackReceived {
        received: true,
        outcome: ack.outcome,
    }))
}
