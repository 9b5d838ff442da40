use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, info};

use super::AppState;
use crate::health::{HealthState, HealthStatus};

/// GET /health. 503 when a component is down.
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        info!("✅ Health check passed");
        Ok(Json(health_status))
    }
}

/// GET /health/live
pub async fn liveness() -> &'static str {
    "OK"
}
