#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use cartflow_api::{
    app_router,
    auth::issue_token,
    config::AppConfig,
    db,
    entities::{coupon, product, user, user_address},
    errors::ServiceError,
    events::{self, EventSender},
    gateway::{signature, CheckoutSessionRequest, GatewaySession, PaymentGateway},
    handlers::AppServices,
    AppState,
};

pub const TEST_JWT_SECRET: &str =
    "integration-test-secret-0123456789-integration-test-secret-0123456789";

pub const WEBHOOK_SECRET: &str = "whsec_integration_test";

/// Gateway double: returns a canned session and records every request so
/// tests can assert on exactly what the service sent out.
#[derive(Default)]
pub struct FakeGateway {
    pub requests: Mutex<Vec<CheckoutSessionRequest>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        let session = GatewaySession {
            id: id.clone(),
            url: Some(format!("https://gateway.test/pay/{}", id)),
            payload: json!({ "id": id, "object": "checkout.session" }),
        };
        self.requests.lock().await.push(request);
        Ok(session)
    }
}

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database and a fake payment gateway.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub gateway: Arc<FakeGateway>,
    _db_dir: tempfile::TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::build(Some(WEBHOOK_SECRET)).await
    }

    /// Same as [`TestApp::new`] but with webhook verification unconfigured.
    pub async fn without_webhook_secret() -> Self {
        Self::build(None).await
    }

    async fn build(webhook_secret: Option<&str>) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for sqlite");
        let db_path = db_dir.path().join("cartflow_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.checkout.webhook_secret = webhook_secret.map(|s| s.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            gateway.clone(),
            &cfg,
        );

        let state = Arc::new(AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            redis: None,
        });

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Mint a bearer token for an existing user id.
    pub fn token_for(&self, user_id: Uuid, role: &str) -> String {
        issue_token(
            user_id,
            role,
            &self.state.config.jwt_secret,
            Duration::hours(1),
        )
        .expect("issue test token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Deliver a signed webhook payload the way the gateway would.
    pub async fn deliver_webhook(&self, payload: &Value) -> axum::response::Response {
        self.deliver_webhook_signed(payload, WEBHOOK_SECRET).await
    }

    pub async fn deliver_webhook_signed(
        &self,
        payload: &Value,
        secret: &str,
    ) -> axum::response::Response {
        let bytes = serde_json::to_vec(payload).expect("serialize webhook payload");
        let ts = Utc::now().timestamp();
        let sig = signature::sign(secret, ts, &bytes);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhook")
            .header("content-type", "application/json")
            .header("x-timestamp", ts.to_string())
            .header("x-signature", sig)
            .body(Body::from(bytes))
            .expect("failed to build webhook request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook delivery")
    }

    pub async fn seed_user(&self, email: &str, role: &str) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            name: Set("Test Buyer".to_string()),
            role: Set(role.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_address(&self, user_id: Uuid) -> user_address::Model {
        user_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            country: Set("Egypt".to_string()),
            address: Set("12 Nile St".to_string()),
            governorate: Set("Cairo".to_string()),
            city: Set("Giza".to_string()),
            post_code: Set("12511".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user address")
    }

    pub async fn seed_product(
        &self,
        title: &str,
        price: Decimal,
        discount_percent: Decimal,
        quantity_on_hand: i32,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            price: Set(price),
            discount_percent: Set(discount_percent),
            quantity_on_hand: Set(quantity_on_hand),
            quantity_sold: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_percent: Decimal,
        valid_for: Duration,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_percent: Set(discount_percent),
            expires_at: Set(now + valid_for),
            created_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
