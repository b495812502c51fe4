use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response, StatusCode},
    Router,
};
use hmac::{Hmac, Mac};
use http::HeaderMap;
use rust_decimal::Decimal;
use sha2::Sha256;
use tokio::sync::mpsc;
use tower::ServiceExt;

use storefront_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::order,
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    notifications::{NotificationError, NotificationService},
    processor::{
        CheckoutSessionSummary, CreateSessionParams, PaymentProcessor, RefundDetails,
        SessionDetails, SessionLineItemDetails,
    },
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Scripted stand-in for the hosted-checkout processor.
pub struct MockProcessor {
    counter: AtomicUsize,
    sessions: Mutex<HashMap<String, SessionDetails>>,
    pub created: Mutex<Vec<CreateSessionParams>>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            sessions: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Register or replace a session record served by retrieve_session.
    pub fn register_session(&self, session: SessionDetails) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Flip a stored session to paid, as the processor would after checkout.
    pub fn mark_session_paid(&self, session_id: &str, payment_intent_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(session_id) {
            session.payment_status = "paid".to_string();
            session.payment_intent_id = Some(payment_intent_id.to_string());
        }
    }

    /// Drop a session so retrieval fails, simulating a processor outage.
    pub fn forget_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub fn session(&self, session_id: &str) -> Option<SessionDetails> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn create_checkout_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<CheckoutSessionSummary, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{}", n);

        let amount_total_minor: i64 = params
            .line_items
            .iter()
            .map(|item| item.unit_amount_minor * item.quantity)
            .sum();

        let session = SessionDetails {
            id: id.clone(),
            payment_status: "unpaid".to_string(),
            payment_intent_id: None,
            amount_total_minor,
            currency: params.currency.clone(),
            customer_email: Some(params.customer_email.clone()),
            metadata: params.metadata.iter().cloned().collect(),
            line_items: params
                .line_items
                .iter()
                .map(|item| SessionLineItemDetails {
                    name: item.name.clone(),
                    unit_amount_minor: item.unit_amount_minor,
                    quantity: item.quantity,
                    amount_total_minor: item.unit_amount_minor * item.quantity,
                    image: item.image.clone(),
                })
                .collect(),
        };
        self.register_session(session);
        self.created.lock().unwrap().push(params);

        Ok(CheckoutSessionSummary {
            url: format!("https://checkout.processor.test/pay/{}", id),
            id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails, ServiceError> {
        self.session(session_id).ok_or_else(|| {
            ServiceError::ExternalServiceError(format!("no such session: {}", session_id))
        })
    }

    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount_minor: Option<i64>,
        _reason: Option<String>,
    ) -> Result<RefundDetails, ServiceError> {
        let full_amount = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.payment_intent_id.as_deref() == Some(payment_intent_id))
            .map(|s| s.amount_total_minor)
            .unwrap_or_default();

        Ok(RefundDetails {
            id: format!("re_test_{}", payment_intent_id),
            amount_minor: amount_minor.unwrap_or(full_amount),
            status: "succeeded".to_string(),
        })
    }
}

/// Records every dispatch instead of sending anything; can be flipped into a
/// failing mode to exercise the soft-failure contract.
pub struct RecordingNotifier {
    pub status_emails: Mutex<Vec<(String, i64)>>,
    pub admin_alerts: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            status_emails: Mutex::new(Vec::new()),
            admin_alerts: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn status_email_count(&self) -> usize {
        self.status_emails.lock().unwrap().len()
    }

    pub fn admin_alert_count(&self) -> usize {
        self.admin_alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send_status_email(
        &self,
        order: &order::Model,
        template_id: i64,
    ) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("connection refused".into()));
        }
        self.status_emails
            .lock()
            .unwrap()
            .push((order.session_id.clone(), template_id));
        Ok(())
    }

    async fn send_admin_new_order_alert(
        &self,
        order: &order::Model,
    ) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("connection refused".into()));
        }
        self.admin_alerts
            .lock()
            .unwrap()
            .push(order.session_id.clone());
        Ok(())
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 18_080,
        environment: "test".into(),
        log_level: "info".into(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        cors_allow_any_origin: false,
        cors_allow_credentials: false,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 30,
        db_idle_timeout_secs: 600,
        db_acquire_timeout_secs: 8,
        event_channel_capacity: 256,
        processor_secret_key: "sk_test_key".into(),
        processor_api_base: "https://api.processor.test/v1".into(),
        processor_webhook_secret: Some(WEBHOOK_SECRET.into()),
        processor_webhook_tolerance_secs: Some(300),
        frontend_url: "https://shop.example".into(),
        default_currency: "eur".into(),
        home_delivery_fee: Decimal::new(500, 2),
        email_api_key: Some("xkeysib-test".into()),
        email_api_base: "https://api.email.test/v3".into(),
        email_sender_name: "Storefront".into(),
        email_sender_address: Some("orders@shop.example".into()),
        admin_email: Some("admin@shop.example".into()),
        email_template_confirmed: 23,
        email_template_preparing: 24,
        email_template_shipped: 25,
    }
}

/// Helper harness: application state backed by an in-memory SQLite database
/// with scripted processor and notifier doubles.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub processor: Arc<MockProcessor>,
    pub notifier: Arc<RecordingNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let cfg = test_config();

        // A single pooled connection keeps the in-memory database alive and
        // shared across queries.
        let db_cfg = DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&db_cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let processor = Arc::new(MockProcessor::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let services = AppServices::new(
            db_arc.clone(),
            cfg.clone(),
            Arc::new(event_sender.clone()),
            processor.clone(),
            notifier.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            processor,
            notifier,
            _event_task: event_task,
        }
    }

    /// Issue a request against the in-process router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .expect("router should produce a response")
    }

    /// Deliver a webhook payload signed with the wrong secret.
    pub async fn request_with_bad_signature(
        &self,
        payload: &serde_json::Value,
    ) -> Response<Body> {
        let bytes = serde_json::to_vec(payload).unwrap();
        let signature = stripe_signature_header("whsec_wrong_secret", &bytes);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("Stripe-Signature", signature)
            .body(Body::from(bytes))
            .unwrap();

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should produce a response")
    }

    /// Deliver a signed webhook payload to the event endpoint.
    pub async fn deliver_webhook(&self, payload: &serde_json::Value) -> Response<Body> {
        let bytes = serde_json::to_vec(payload).unwrap();
        let signature = stripe_signature_header(WEBHOOK_SECRET, &bytes);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("Stripe-Signature", signature)
            .body(Body::from(bytes))
            .unwrap();

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should produce a response")
    }
}

/// Sign a payload the way the processor does: `t=<ts>,v1=<hmac>`.
pub fn stripe_signature_header(secret: &str, payload: &[u8]) -> String {
    let ts = chrono::Utc::now().timestamp();
    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap());
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(signed.as_bytes());
    format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

/// Signed headers for calling the reconciliation service directly.
pub fn signed_headers(payload: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Stripe-Signature",
        stripe_signature_header(WEBHOOK_SECRET, payload)
            .parse()
            .unwrap(),
    );
    headers
}

pub fn completed_event(session_id: &str, payment_intent: &str, amount_total: i64) -> serde_json::Value {
    serde_json::json!({
        "id": format!("evt_{}", session_id),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "payment_status": "paid",
                "payment_intent": payment_intent,
                "amount_total": amount_total,
            }
        }
    })
}

pub fn expired_event(session_id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": format!("evt_exp_{}", session_id),
        "type": "checkout.session.expired",
        "data": {
            "object": { "id": session_id }
        }
    })
}

/// Parse a JSON field that serializes a decimal amount (string or number).
#[allow(dead_code)]
pub fn dec_field(value: &serde_json::Value) -> Decimal {
    match value {
        serde_json::Value::String(s) => s.parse().expect("decimal string"),
        serde_json::Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal value: {:?}", other),
    }
}

pub async fn read_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Standard checkout request used across tests: two products, home delivery.
pub fn checkout_request() -> serde_json::Value {
    serde_json::json!({
        "items": [
            {"id": 1, "name": "Oat drink", "price": "19.99", "quantity": 2, "image": "https://img/oat.png"},
            {"id": 2, "name": "Almond drink", "price": "4.50", "quantity": 1}
        ],
        "customer": {
            "name": "Jo Martin",
            "email": "jo@example.com",
            "phone": "+33600000000",
            "address": {
                "line1": "1 rue de la Paix",
                "city": "Paris",
                "postal_code": "75002",
                "country": "FR"
            }
        },
        "delivery_method": "domicile",
        "payment_method": "card",
        "total": "44.48"
    })
}

#[allow(dead_code)]
pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected);
}

/// Drive a full checkout + completed webhook, returning the order's ID and
/// its session ID.
#[allow(dead_code)]
pub async fn materialize_order(app: &TestApp) -> (uuid::Uuid, String) {
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

    app.processor.mark_session_paid(&session_id, "pi_fixture");
    let response = app
        .deliver_webhook(&completed_event(&session_id, "pi_fixture", 4948))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app
        .state
        .services
        .orders
        .find_by_session(&session_id)
        .await
        .unwrap()
        .expect("order should have been materialized");
    (order.id, session_id)
}
