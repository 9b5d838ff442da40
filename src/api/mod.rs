//! HTTP surface of the payment engine.

pub mod callbacks;
pub mod health;
pub mod refunds;
pub mod sessions;

use axum::{
    extract::rejection::JsonRejection,
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::health::HealthChecker;
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{CallbackProcessor, RefundService, SessionService};

#[derive(Clone)]
pub struct AppState {
    pub callbacks: Arc<CallbackProcessor>,
    pub sessions: Arc<SessionService>,
    pub refunds: Arc<RefundService>,
    pub health_checker: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route(
            "/api/payments/{provider}/callback",
            post(callbacks::handle_callback),
        )
        .route(
            "/api/payments/{provider}/session",
            post(sessions::create_session),
        )
        .route("/api/admin/refunds", post(refunds::create_refund))
        .route(
            "/api/admin/orders/{id}/refunds",
            get(refunds::refund_history),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(
                    |request: &axum::http::Request<_>| {
                        let request_id = get_request_id_from_headers(request.headers())
                            .unwrap_or_else(|| "-".to_string());
                        tracing::info_span!(
                            "http_request",
                            request_id = %request_id,
                            method = %request.method(),
                            uri = %request.uri(),
                        )
                    },
                ))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Tags an error with the request id the request-id layer assigned.
pub(crate) fn tag_request(err: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

pub(crate) fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::MalformedPayload {
        reason: rejection.body_text(),
    }))
}
