//! Shared fixtures: a scriptable gateway, a recording notifier and an
//! in-memory application.

#![allow(dead_code)]

use async_trait::async_trait;
use booking_payments::app::App;
use booking_payments::config::PaymentsConfig;
use booking_payments::database::InMemoryOrderStore;
use booking_payments::models::{
    Guide, GuideHireRequest, Order, OrderKind, OrderStatus, PaymentStatus, RequestStatus,
};
use booking_payments::payments::error::{PaymentError, PaymentResult};
use booking_payments::payments::factory::PaymentProviderFactory;
use booking_payments::payments::provider::PaymentGateway;
use booking_payments::payments::types::{
    CallbackPayload, CallbackStatus, ProviderName, RedirectInstructions, RefundRequest,
    RefundResponse, SessionRequest, SessionResponse, StatusRequest, StatusResponse,
    WebhookVerificationResult,
};
use booking_payments::services::notification::{Notification, NotificationError, Notifier};
use chrono::{TimeZone, Utc};
use http::HeaderMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_SIGNATURE_HEADER: &str = "x-test-signature";
pub const VALID_SIGNATURE: &str = "valid";

/// Gateway double. Callbacks are JSON `{"order_id", "status"?, "transaction_id"?}`
/// and are valid when `x-test-signature: valid` is present.
pub struct ScriptedGateway {
    name: ProviderName,
    callback_ips: Vec<IpAddr>,
    poll_status: Mutex<CallbackStatus>,
    refund_results: Mutex<VecDeque<PaymentResult<RefundResponse>>>,
    pub session_calls: AtomicU32,
    pub poll_calls: AtomicU32,
    pub refund_calls: AtomicU32,
    pub refund_requests: Mutex<Vec<RefundRequest>>,
}

impl ScriptedGateway {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            callback_ips: Vec::new(),
            poll_status: Mutex::new(CallbackStatus::Known(PaymentStatus::Paid)),
            refund_results: Mutex::new(VecDeque::new()),
            session_calls: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
            refund_calls: AtomicU32::new(0),
            refund_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_callback_ips(mut self, ips: Vec<IpAddr>) -> Self {
        self.callback_ips = ips;
        self
    }

    pub fn set_poll_status(&self, status: CallbackStatus) {
        *self.poll_status.lock().expect("poll status lock") = status;
    }

    /// Queues the outcome of the next refund call. Unscripted calls succeed.
    pub fn push_refund_result(&self, result: PaymentResult<RefundResponse>) {
        self.refund_results
            .lock()
            .expect("refund script lock")
            .push_back(result);
    }

    pub fn sessions(&self) -> u32 {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> u32 {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<SessionResponse> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SessionResponse {
            session_ref: format!("sess_{}", request.order_id),
            redirect: RedirectInstructions::Redirect {
                url: format!("https://gateway.test/pay/{}", request.order_number),
            },
        })
    }

    async fn poll_status(&self, _request: StatusRequest) -> PaymentResult<StatusResponse> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StatusResponse {
            status: self.poll_status.lock().expect("poll status lock").clone(),
            transaction_ref: Some("tx_polled".to_string()),
            provider_data: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let reference = format!("rf_{}", request.idempotency_key);
        self.refund_requests
            .lock()
            .expect("refund log lock")
            .push(request);
        self.refund_results
            .lock()
            .expect("refund script lock")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(RefundResponse {
                    provider_reference: Some(reference.clone()),
                    raw: serde_json::json!({ "id": reference, "status": "succeeded" }),
                })
            })
    }

    fn name(&self) -> ProviderName {
        self.name
    }

    fn callback_ips(&self) -> &[IpAddr] {
        &self.callback_ips
    }

    fn verify_callback(
        &self,
        headers: &HeaderMap,
        _body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult> {
        let valid = headers
            .get(TEST_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            == Some(VALID_SIGNATURE);
        Ok(WebhookVerificationResult {
            valid,
            reason: (!valid).then(|| "bad test signature".to_string()),
        })
    }

    fn parse_callback(&self, _headers: &HeaderMap, body: &[u8]) -> PaymentResult<CallbackPayload> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| PaymentError::ValidationError {
                message: e.to_string(),
                field: Some("body".to_string()),
            })?;
        let raw_order = match value.get("order_id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(PaymentError::ValidationError {
                    message: "missing order_id".to_string(),
                    field: Some("order_id".to_string()),
                })
            }
        };
        let order_ref = booking_payments::models::OrderRef::parse(&raw_order).ok_or(
            PaymentError::ValidationError {
                message: "empty order_id".to_string(),
                field: Some("order_id".to_string()),
            },
        )?;
        let status = value.get("status").and_then(|s| s.as_str()).map(|raw| {
            match PaymentStatus::from_db_status(raw) {
                Some(status) => CallbackStatus::Known(status),
                None => CallbackStatus::Unknown(raw.to_string()),
            }
        });
        let transaction_ref = value
            .get("transaction_id")
            .and_then(|s| s.as_str())
            .map(str::to_string);
        Ok(CallbackPayload {
            order_ref,
            status,
            transaction_ref,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("notifier lock")
            .push(notification.clone());
        Ok(())
    }
}

pub fn test_config() -> PaymentsConfig {
    PaymentsConfig {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        sweeper_stale_after_secs: 60,
        ..PaymentsConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<InMemoryOrderStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub app: App,
}

pub fn harness() -> Harness {
    harness_with(ScriptedGateway::new(ProviderName::CheckoutSession), test_config())
}

pub fn harness_with(gateway: ScriptedGateway, config: PaymentsConfig) -> Harness {
    let store = Arc::new(InMemoryOrderStore::new());
    let gateway = Arc::new(gateway);
    let notifier = Arc::new(RecordingNotifier::default());
    let factory = Arc::new(PaymentProviderFactory::with_gateways(
        gateway.name(),
        vec![gateway.clone() as Arc<dyn PaymentGateway>],
    ));
    let app = App::assemble(store.clone(), factory, notifier.clone(), &config);
    Harness {
        store,
        gateway,
        notifier,
        app,
    }
}

/// 2023-11-14T22:13:20Z, i.e. 1_700_000_000_000 ms.
pub fn fixed_created_at() -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000)
        .single()
        .expect("valid timestamp")
}

pub fn order(
    id: i64,
    kind: OrderKind,
    subject_id: i64,
    total_minor: i64,
    payment_status: PaymentStatus,
) -> Order {
    let created_at = fixed_created_at();
    Order {
        id,
        order_number: kind.order_number(created_at, id),
        kind,
        subject_id,
        customer_email: Some(format!("guest{}@example.com", id)),
        total_amount: total_minor,
        currency: "AED".to_string(),
        status: if payment_status == PaymentStatus::Paid {
            OrderStatus::Confirmed
        } else {
            OrderStatus::Pending
        },
        payment_status,
        payment_method: Some(ProviderName::CheckoutSession.as_str().to_string()),
        payment_intent_id: Some(format!("sess_{}", id)),
        gateway_transaction_id: None,
        created_at,
        updated_at: Utc::now(),
    }
}

/// Seeds guide 9 at `rate_minor` a day and a confirmed hire request 4 for
/// `days` days.
pub async fn seed_guide_hire(store: &InMemoryOrderStore, rate_minor: Option<i64>, days: i64) {
    store
        .insert_guide(Guide {
            id: 9,
            name: "Aisha".to_string(),
            email: Some("guide9@example.com".to_string()),
            price_per_day: rate_minor,
        })
        .await;
    store
        .insert_guide_hire_request(GuideHireRequest {
            id: 4,
            guide_id: 9,
            number_of_days: days,
            status: RequestStatus::Confirmed,
        })
        .await;
}

/// Drains whatever the engine queued onto the side-effect worker.
pub async fn drain_side_effects(app: &mut App) -> usize {
    app.side_effect_worker.drain_pending().await
}
