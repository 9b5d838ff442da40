//! Gateway adapters against a mock HTTP server.

use booking_payments::models::{OrderRef, PaymentStatus};
use booking_payments::payments::error::PaymentError;
use booking_payments::payments::provider::PaymentGateway;
use booking_payments::payments::providers::{
    CheckoutSessionConfig, CheckoutSessionGateway, HostedFormConfig, HostedFormGateway,
};
use booking_payments::payments::types::{
    CallbackStatus, RedirectInstructions, RefundRequest, SessionRequest, StatusRequest,
};
use booking_payments::payments::utils::hmac_sha512_hex;
use http::HeaderMap;
use serde_json::json;
use wiremock::matchers::{bearer_token, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn checkout(server: &MockServer) -> CheckoutSessionGateway {
    CheckoutSessionGateway::new(CheckoutSessionConfig {
        secret_key: "sk_test".to_string(),
        webhook_secret: Some("whsec_test".to_string()),
        base_url: server.uri(),
        timeout_secs: 5,
        callback_ips: vec![],
    })
    .expect("gateway should build")
}

fn hosted_form(server: &MockServer) -> HostedFormGateway {
    HostedFormGateway::new(HostedFormConfig {
        merchant_key: "merchant_test".to_string(),
        password: "pw_test".to_string(),
        base_url: server.uri(),
        payment_url: format!("{}/pay", server.uri()),
        timeout_secs: 5,
        callback_ips: vec![],
    })
    .expect("gateway should build")
}

fn session_request() -> SessionRequest {
    SessionRequest {
        order_id: 42,
        order_number: "GUIDE-1700000000000-42".to_string(),
        amount_minor: 30_000,
        currency: "AED".to_string(),
        customer_email: Some("guest42@example.com".to_string()),
        description: "Guide hire".to_string(),
        callback_url: "https://api.test/api/payments/checkout_session/callback".to_string(),
        return_url: "https://app.test/orders/42".to_string(),
    }
}

fn refund_request() -> RefundRequest {
    RefundRequest {
        order_number: "BT-1700000000000-30".to_string(),
        session_ref: Some("cs_30".to_string()),
        transaction_ref: Some("tx_30".to_string()),
        amount_minor: 40_000,
        currency: "AED".to_string(),
        reason: "guest cancelled".to_string(),
        idempotency_key: "refund-30-1".to_string(),
    }
}

#[tokio::test]
async fn checkout_session_creates_a_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sessions"))
        .and(bearer_token("sk_test"))
        .and(body_partial_json(json!({
            "amount": 30_000,
            "currency": "AED",
            "reference": "GUIDE-1700000000000-42",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_42",
            "url": "https://checkout.test/c/cs_42",
            "status": "open",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = checkout(&server)
        .create_session(session_request())
        .await
        .expect("session should be created");

    assert_eq!(response.session_ref, "cs_42");
    assert_eq!(
        response.redirect,
        RedirectInstructions::Redirect {
            url: "https://checkout.test/c/cs_42".to_string()
        }
    );
}

#[tokio::test]
async fn checkout_session_poll_prefers_payment_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/sessions/cs_42"))
        .and(bearer_token("sk_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_42",
            "status": "complete",
            "payment_status": "paid",
            "transaction_id": "tx_42",
        })))
        .mount(&server)
        .await;

    let status = checkout(&server)
        .poll_status(StatusRequest {
            order_number: "GUIDE-1700000000000-42".to_string(),
            session_ref: Some("cs_42".to_string()),
        })
        .await
        .expect("poll should succeed");

    assert_eq!(status.status, CallbackStatus::Known(PaymentStatus::Paid));
    assert_eq!(status.transaction_ref.as_deref(), Some("tx_42"));
}

#[tokio::test]
async fn checkout_session_poll_without_session_is_rejected_locally() {
    let server = MockServer::start().await;

    let err = checkout(&server)
        .poll_status(StatusRequest {
            order_number: "GUIDE-1700000000000-42".to_string(),
            session_ref: None,
        })
        .await
        .expect_err("poll needs a session");

    assert!(matches!(err, PaymentError::ValidationError { .. }));
    assert!(server
        .received_requests()
        .await
        .unwrap_or_default()
        .is_empty());
}

#[tokio::test]
async fn checkout_session_refund_sends_idempotency_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(bearer_token("sk_test"))
        .and(header("Idempotency-Key", "refund-30-1"))
        .and(body_partial_json(json!({ "session_id": "cs_30", "amount": 40_000 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_1",
            "status": "pending",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = checkout(&server)
        .refund(refund_request())
        .await
        .expect("pending refund counts as accepted");

    assert_eq!(response.provider_reference.as_deref(), Some("re_1"));
}

#[tokio::test]
async fn checkout_session_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let err = checkout(&server)
        .refund(refund_request())
        .await
        .expect_err("503 should fail");

    assert!(err.is_retryable());
    assert!(!err.is_safe_to_resend());
}

#[tokio::test]
async fn checkout_session_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/sessions/cs_42"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let err = checkout(&server)
        .poll_status(StatusRequest {
            order_number: "GUIDE-1700000000000-42".to_string(),
            session_ref: Some("cs_42".to_string()),
        })
        .await
        .expect_err("429 should fail");

    match err {
        PaymentError::RateLimitError {
            retry_after_seconds,
            ..
        } => assert_eq!(retry_after_seconds, Some(7)),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn checkout_session_callback_is_signed_with_the_webhook_secret() {
    let server = MockServer::start().await;
    let gateway = checkout(&server);
    let body = br#"{"order_id":"GUIDE-1700000000000-42"}"#;

    let mut headers = HeaderMap::new();
    headers.insert(
        "x-signature",
        hmac_sha512_hex(b"whsec_test", body)
            .parse()
            .expect("header value"),
    );
    assert!(gateway.verify_callback(&headers, body).expect("verify").valid);

    let payload = gateway.parse_callback(&headers, body).expect("parse");
    assert_eq!(
        payload.order_ref,
        OrderRef::Number("GUIDE-1700000000000-42".to_string())
    );
    assert!(payload.status.is_none());
}

#[tokio::test]
async fn hosted_form_poll_maps_gateway_words() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/status"))
        .and(body_partial_json(json!({
            "merchant_key": "merchant_test",
            "order_id": "BT-1700000000000-30",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "captured",
            "transaction_id": "hf_tx_30",
        })))
        .mount(&server)
        .await;

    let status = hosted_form(&server)
        .poll_status(StatusRequest {
            order_number: "BT-1700000000000-30".to_string(),
            session_ref: None,
        })
        .await
        .expect("poll should succeed");

    assert_eq!(status.status, CallbackStatus::Known(PaymentStatus::Paid));
    assert_eq!(status.transaction_ref.as_deref(), Some("hf_tx_30"));
}

#[tokio::test]
async fn hosted_form_poll_settles_charged_and_rejected() {
    for (order_number, word, expected) in [
        ("BT-1700000000000-31", "charged", PaymentStatus::Paid),
        ("BT-1700000000000-32", "rejected", PaymentStatus::Failed),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/status"))
            .and(body_partial_json(json!({ "order_id": order_number })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": word })))
            .mount(&server)
            .await;

        let status = hosted_form(&server)
            .poll_status(StatusRequest {
                order_number: order_number.to_string(),
                session_ref: None,
            })
            .await
            .expect("poll should succeed");

        assert_eq!(status.status, CallbackStatus::Known(expected), "{}", word);
        assert!(status.transaction_ref.is_none());
    }
}

#[tokio::test]
async fn checkout_session_poll_settles_charged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/sessions/cs_43"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_43",
            "payment_status": "charged",
        })))
        .mount(&server)
        .await;

    let status = checkout(&server)
        .poll_status(StatusRequest {
            order_number: "BT-1700000000000-43".to_string(),
            session_ref: Some("cs_43".to_string()),
        })
        .await
        .expect("poll should succeed");

    assert_eq!(status.status, CallbackStatus::Known(PaymentStatus::Paid));
}

#[tokio::test]
async fn hosted_form_refund_uses_the_refund_key_as_reference() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/refund"))
        .and(body_partial_json(json!({
            "order_id": "BT-1700000000000-30",
            "amount": "40000",
            "reference": "refund-30-1",
            "transaction_id": "tx_30",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "approved",
            "refund_id": "hf_rf_1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = hosted_form(&server)
        .refund(refund_request())
        .await
        .expect("refund should succeed");

    assert_eq!(response.provider_reference.as_deref(), Some("hf_rf_1"));
}

#[tokio::test]
async fn hosted_form_declined_refund_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/refund"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "rejected",
            "message": "transaction already settled",
        })))
        .mount(&server)
        .await;

    let err = hosted_form(&server)
        .refund(refund_request())
        .await
        .expect_err("declined refund should fail");

    match &err {
        PaymentError::PaymentDeclinedError {
            message,
            provider_code,
        } => {
            assert_eq!(message, "transaction already settled");
            assert_eq!(provider_code.as_deref(), Some("rejected"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn hosted_form_json_callback_round_trips_its_hash() {
    let server = MockServer::start().await;
    let gateway = hosted_form(&server);
    let hash = gateway.callback_hash("GUIDE-1700000000000-42", "success", "hf_tx_42");
    let body = json!({
        "order_id": "GUIDE-1700000000000-42",
        "status": "success",
        "transaction_id": "hf_tx_42",
        "hash": hash,
    })
    .to_string();

    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    assert!(gateway
        .verify_callback(&headers, body.as_bytes())
        .expect("verify")
        .valid);

    let payload = gateway
        .parse_callback(&headers, body.as_bytes())
        .expect("parse");
    assert_eq!(payload.status, Some(CallbackStatus::Known(PaymentStatus::Paid)));
    assert_eq!(payload.transaction_ref.as_deref(), Some("hf_tx_42"));
}
