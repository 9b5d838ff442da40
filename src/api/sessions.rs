use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use super::{json_rejection, tag_request, AppState};
use crate::error::AppError;
use crate::services::session::SessionOutcome;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub order_number: String,
}

/// POST /api/payments/{provider}/session
pub async fn create_session(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Result<Json<CreateSessionBody>, JsonRejection>,
) -> Result<Json<SessionOutcome>, AppError> {
    let Json(body) = body.map_err(|r| tag_request(json_rejection(r), &headers))?;
    if body.order_number.trim().is_empty() {
        return Err(tag_request(
            AppError::invalid_field("orderNumber", "is required"),
            &headers,
        ));
    }

    let outcome = state
        .sessions
        .create_session(&provider, &body.order_number)
        .await
        .map_err(|e| tag_request(e.into(), &headers))?;

    Ok(Json(outcome))
}
