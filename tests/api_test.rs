//! HTTP-level behaviour of the session, callback and refund endpoints.

mod common;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use booking_payments::api::router;
use booking_payments::config::{Environment, PaymentsConfig};
use booking_payments::database::OrderStore;
use booking_payments::models::{OrderKind, PaymentStatus, RefundLogStatus};
use booking_payments::payments::error::PaymentError;
use booking_payments::payments::types::{CallbackStatus, ProviderName};
use common::{
    harness, harness_with, order, seed_guide_hire, test_config, Harness, ScriptedGateway,
    TEST_SIGNATURE_HEADER, VALID_SIGNATURE,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower::ServiceExt;

fn app(h: &Harness, peer: SocketAddr) -> Router {
    router(h.app.state.clone()).layer(MockConnectInfo(peer))
}

fn local_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40_000))
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.expect("request should run");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn callback(provider: &str, body: Value, signed: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/payments/{}/callback", provider))
        .header("content-type", "application/json");
    if signed {
        builder = builder.header(TEST_SIGNATURE_HEADER, VALID_SIGNATURE);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn refund_body(order_id: i64, amount: Option<f64>) -> Value {
    let mut body = json!({
        "orderId": order_id,
        "reason": "guest cancelled",
        "adminId": "admin-7",
    });
    if let Some(amount) = amount {
        body["amount"] = json!(amount);
    }
    body
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn guide_hire_session_opens_when_price_still_holds() {
    let h = harness();
    seed_guide_hire(&h.store, Some(10_000), 3).await;
    h.store
        .insert_order(order(42, OrderKind::GuideHire, 4, 30_000, PaymentStatus::Unpaid))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        post_json(
            "/api/payments/checkout_session/session",
            json!({ "orderNumber": "GUIDE-1700000000000-42" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["sessionRef"], "sess_42");
    assert_eq!(body["amount"], 300.0);
    assert_eq!(h.gateway.sessions(), 1);

    let stored = h.store.find_order(42).await.expect("read").expect("exists");
    assert_eq!(stored.payment_status, PaymentStatus::Processing);
    assert_eq!(stored.payment_intent_id.as_deref(), Some("sess_42"));
}

#[tokio::test]
async fn guide_rate_change_blocks_session_with_price_mismatch() {
    let h = harness();
    seed_guide_hire(&h.store, Some(15_000), 3).await;
    h.store
        .insert_order(order(42, OrderKind::GuideHire, 4, 30_000, PaymentStatus::Unpaid))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        post_json(
            "/api/payments/checkout_session/session",
            json!({ "orderNumber": "GUIDE-1700000000000-42" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "PRICE_MISMATCH");
    assert_eq!(body["details"]["expectedPrice"], 450.0);
    assert_eq!(body["details"]["currentPrice"], 300.0);
    assert_eq!(h.gateway.sessions(), 0);

    let stored = h.store.find_order(42).await.expect("read").expect("exists");
    assert_eq!(stored.payment_status, PaymentStatus::Unpaid);
}

#[tokio::test]
async fn paid_order_cannot_open_another_session() {
    let h = harness();
    h.store
        .insert_order(order(10, OrderKind::Tour, 5, 45_000, PaymentStatus::Paid))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        post_json(
            "/api/payments/checkout_session/session",
            json!({ "orderNumber": "BT-1700000000000-10" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "ORDER_NOT_PAYABLE");
    assert_eq!(h.gateway.sessions(), 0);
}

#[tokio::test]
async fn unknown_provider_is_not_found() {
    let h = harness();

    let (status, body) = send(
        app(&h, local_peer()),
        post_json(
            "/api/payments/carrier_pigeon/session",
            json!({ "orderNumber": "BT-1700000000000-10" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "UNSUPPORTED_PROVIDER");
}

#[tokio::test]
async fn empty_order_number_is_rejected() {
    let h = harness();

    let (status, body) = send(
        app(&h, local_peer()),
        post_json(
            "/api/payments/checkout_session/session",
            json!({ "orderNumber": "  " }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signed_paid_callback_is_acknowledged_and_duplicates_too() {
    let h = harness();
    h.store
        .insert_order(order(20, OrderKind::Tour, 5, 45_000, PaymentStatus::Processing))
        .await;
    let payload = json!({ "order_id": 20, "status": "paid", "transaction_id": "tx_20" });

    let (status, body) = send(
        app(&h, local_peer()),
        callback("checkout_session", payload.clone(), true),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"]["result"], "applied");
    assert_eq!(body["outcome"]["to"], "paid");

    let (status, body) = send(
        app(&h, local_peer()),
        callback("checkout_session", payload, true),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["result"], "duplicate");

    let stored = h.store.find_order(20).await.expect("read").expect("exists");
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.gateway_transaction_id.as_deref(), Some("tx_20"));
}

#[tokio::test]
async fn order_number_reference_resolves_the_order() {
    let h = harness();
    h.store
        .insert_order(order(21, OrderKind::Tour, 5, 45_000, PaymentStatus::Processing))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        callback(
            "checkout_session",
            json!({ "order_id": "BT-1700000000000-21", "status": "failed" }),
            true,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let stored = h.store.find_order(21).await.expect("read").expect("exists");
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn bad_signature_is_unauthorized_and_changes_nothing() {
    let h = harness();
    h.store
        .insert_order(order(22, OrderKind::Tour, 5, 45_000, PaymentStatus::Processing))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        callback(
            "checkout_session",
            json!({ "order_id": 22, "status": "paid" }),
            false,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_SIGNATURE");
    let stored = h.store.find_order(22).await.expect("read").expect("exists");
    assert_eq!(stored.payment_status, PaymentStatus::Processing);
}

#[tokio::test]
async fn production_rejects_callbacks_from_unlisted_sources() {
    let gateway = ScriptedGateway::new(ProviderName::CheckoutSession)
        .with_callback_ips(vec!["203.0.113.5".parse().expect("ip")]);
    let config = PaymentsConfig {
        environment: Environment::Production,
        ..test_config()
    };
    let h = harness_with(gateway, config);
    h.store
        .insert_order(order(23, OrderKind::Tour, 5, 45_000, PaymentStatus::Processing))
        .await;

    let outsider = SocketAddr::from(([198, 51, 100, 7], 443));
    let (status, body) = send(
        app(&h, outsider),
        callback(
            "checkout_session",
            json!({ "order_id": 23, "status": "paid" }),
            true,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN_SOURCE");

    let listed = SocketAddr::from(([203, 0, 113, 5], 443));
    let (status, _) = send(
        app(&h, listed),
        callback(
            "checkout_session",
            json!({ "order_id": 23, "status": "paid" }),
            true,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn callback_for_unknown_order_or_provider_is_not_found() {
    let h = harness();

    let (status, body) = send(
        app(&h, local_peer()),
        callback(
            "checkout_session",
            json!({ "order_id": 999, "status": "paid" }),
            true,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ORDER_NOT_FOUND");

    let (status, body) = send(
        app(&h, local_peer()),
        callback("carrier_pigeon", json!({ "order_id": 1 }), true),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "UNSUPPORTED_PROVIDER");
}

#[tokio::test]
async fn malformed_callback_body_is_bad_request() {
    let h = harness();

    let request = Request::builder()
        .method("POST")
        .uri("/api/payments/checkout_session/callback")
        .header(TEST_SIGNATURE_HEADER, VALID_SIGNATURE)
        .body(Body::from("not json"))
        .expect("request should build");
    let (status, body) = send(app(&h, local_peer()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn statusless_callback_polls_the_gateway() {
    let h = harness();
    h.gateway
        .set_poll_status(CallbackStatus::Known(PaymentStatus::Paid));
    h.store
        .insert_order(order(24, OrderKind::Tour, 5, 45_000, PaymentStatus::Processing))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        callback("checkout_session", json!({ "order_id": 24 }), true),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(h.gateway.polls(), 1);
    let stored = h.store.find_order(24).await.expect("read").expect("exists");
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.gateway_transaction_id.as_deref(), Some("tx_polled"));
}

// ---------------------------------------------------------------------------
// Refunds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refunds_never_exceed_the_order_total() {
    let h = harness();
    h.store
        .insert_order(order(30, OrderKind::Tour, 5, 100_000, PaymentStatus::Paid))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        post_json("/api/admin/refunds", refund_body(30, Some(400.0))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["amount"], 400.0);
    assert_eq!(body["remaining"], 600.0);
    assert_eq!(body["newPaymentStatus"], "partially_refunded");

    let (status, body) = send(
        app(&h, local_peer()),
        post_json("/api/admin/refunds", refund_body(30, Some(400.0))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["remaining"], 200.0);

    let (status, body) = send(
        app(&h, local_peer()),
        post_json("/api/admin/refunds", refund_body(30, Some(400.0))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["amount"], 200.0);
    assert_eq!(body["remaining"], 0.0);
    assert_eq!(body["newPaymentStatus"], "refunded");

    let (status, body) = send(
        app(&h, local_peer()),
        post_json("/api/admin/refunds", refund_body(30, None)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "REFUND_REJECTED");
    assert_eq!(h.gateway.refunds(), 3);

    let request = Request::builder()
        .uri("/api/admin/orders/30/refunds")
        .body(Body::empty())
        .expect("request should build");
    let (status, body) = send(app(&h, local_peer()), request).await;
    assert_eq!(status, StatusCode::OK);
    let refunds = body["refunds"].as_array().expect("refund list");
    assert_eq!(refunds.len(), 3);
    let refunded: i64 = refunds
        .iter()
        .filter(|r| r["status"] == "success")
        .map(|r| r["amountMinor"].as_i64().expect("minor amount"))
        .sum();
    assert_eq!(refunded, 100_000);

    let stored = h.store.find_order(30).await.expect("read").expect("exists");
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn refund_requests_carry_a_stable_idempotency_key() {
    let h = harness();
    h.store
        .insert_order(order(31, OrderKind::Tour, 5, 50_000, PaymentStatus::Paid))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        post_json("/api/admin/refunds", refund_body(31, None)),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let log_id = body["refundLogId"].as_i64().expect("log id");
    let requests = h.gateway.refund_requests.lock().expect("lock").clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount_minor, 50_000);
    assert_eq!(requests[0].idempotency_key, format!("refund-31-{}", log_id));
}

#[tokio::test]
async fn declined_refund_is_logged_failed_and_order_untouched() {
    let h = harness();
    h.store
        .insert_order(order(32, OrderKind::Tour, 5, 50_000, PaymentStatus::Paid))
        .await;
    h.gateway.push_refund_result(Err(PaymentError::PaymentDeclinedError {
        message: "card closed".to_string(),
        provider_code: Some("declined".to_string()),
    }));

    let (status, body) = send(
        app(&h, local_peer()),
        post_json("/api/admin/refunds", refund_body(32, Some(100.0))),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "PAYMENT_DECLINED");

    let logs = h.store.list_refund_logs(32).await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, RefundLogStatus::Failed);
    let stored = h.store.find_order(32).await.expect("read").expect("exists");
    assert_eq!(stored.payment_status, PaymentStatus::Paid);

    let (status, body) = send(
        app(&h, local_peer()),
        post_json("/api/admin/refunds", refund_body(32, None)),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["amount"], 500.0);
}

#[tokio::test]
async fn refund_of_unpaid_order_is_rejected() {
    let h = harness();
    h.store
        .insert_order(order(33, OrderKind::Tour, 5, 50_000, PaymentStatus::Processing))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        post_json("/api/admin/refunds", refund_body(33, Some(10.0))),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "REFUND_REJECTED");
    assert_eq!(h.gateway.refunds(), 0);
}

#[tokio::test]
async fn refund_without_reason_is_invalid() {
    let h = harness();
    h.store
        .insert_order(order(34, OrderKind::Tour, 5, 50_000, PaymentStatus::Paid))
        .await;

    let (status, body) = send(
        app(&h, local_peer()),
        post_json(
            "/api/admin/refunds",
            json!({ "orderId": 34, "reason": "", "adminId": "admin-7" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "reason");
}

#[tokio::test]
async fn history_for_missing_order_is_not_found() {
    let h = harness();
    let request = Request::builder()
        .uri("/api/admin/orders/404/refunds")
        .body(Body::empty())
        .expect("request should build");

    let (status, _) = send(app(&h, local_peer()), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_healthy_store() {
    let h = harness();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request should build");

    let (status, body) = send(app(&h, local_peer()), request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}
