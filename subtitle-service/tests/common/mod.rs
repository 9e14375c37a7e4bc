//! Shared setup for the HTTP-level tests.
//!
//! Every test gets its own in-memory store, mock payment provider and mock
//! transcriber, with the worker pool and event consumer running.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use service_core::utils::signature;
use std::sync::Arc;
use std::time::Duration;
use subtitle_service::{
    build_router,
    config::{test_config, AppConfig},
    models::{Order, OrderChanges, OrderEvent, OrderStatus, PaymentStatus, Role, User},
    services::repository::UserRepository,
    services::{MemoryRepository, MockPaymentProvider},
    startup::{prepare_store, Components},
    utils::{hash_password, Password},
    workers::{MockTranscriber, Transcriber},
    AppState,
};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub repo: Arc<MemoryRepository>,
    pub payments: Arc<MockPaymentProvider>,
    pub transcriber: Arc<MockTranscriber>,
    pub shutdown: CancellationToken,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config(), MockTranscriber::completing()).await
    }

    pub async fn spawn_with(config: AppConfig, transcriber: MockTranscriber) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let payments = Arc::new(MockPaymentProvider::new());
        let transcriber = Arc::new(transcriber);

        let components = Components::new(
            config,
            repo.clone(),
            payments.clone(),
            transcriber.clone() as Arc<dyn Transcriber>,
        );
        prepare_store(&components.state)
            .await
            .expect("Failed to prepare store");
        let (state, shutdown) = components.spawn_background().await;
        let router = build_router(state.clone());

        Self {
            router,
            state,
            repo,
            payments,
            transcriber,
            shutdown,
        }
    }

    /// Inserts an active account with `TEST_PASSWORD` and returns it with a bearer token.
    pub async fn create_user(&self, role: Role) -> (User, String) {
        let hash = hash_password(&Password::new(TEST_PASSWORD.to_string()))
            .expect("Failed to hash password");
        let email = format!("{}-{}@example.com", role.as_str(), Uuid::new_v4().simple());
        let mut user = User::new(&email, hash.into_string(), Some("Test".into()), None);
        user.role = role;
        self.repo.insert_user(&user).await.expect("Failed to insert user");

        let token = self.state.jwt.issue(&user).expect("Failed to issue token");
        (user, token.access_token)
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse { status, body }
    }

    /// Creates an order through the API as the owner of `token`.
    pub async fn create_order(&self, token: &str) -> Uuid {
        let response = self
            .request(
                Method::POST,
                "/api/orders",
                Some(token),
                Some(serde_json::json!({
                    "videos": [{
                        "id": Uuid::new_v4(),
                        "original_filename": "lecture.mp4",
                        "storage_key": "videos/lecture.mp4",
                        "duration_seconds": 90
                    }],
                    "subtitle_config": { "source_language": "en" }
                })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("order id in response")
    }

    /// Drives an order to `completed` without going through the workers.
    pub async fn complete_order(&self, order_id: Uuid, payment_reference: &str) -> Order {
        self.state
            .orders
            .apply_event(
                order_id,
                OrderEvent::PaymentConfirmed,
                OrderChanges {
                    payment_status: Some(PaymentStatus::Paid),
                    payment_reference: Some(payment_reference.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        self.state
            .orders
            .apply_event(order_id, OrderEvent::JobStarted, OrderChanges::default())
            .await
            .unwrap();
        self.state
            .orders
            .apply_event(order_id, OrderEvent::JobSucceeded, OrderChanges::default())
            .await
            .unwrap()
    }

    pub async fn order(&self, order_id: Uuid) -> Order {
        self.state.orders.find(order_id).await.unwrap()
    }

    /// Polls until the order reaches `status` or a second passes.
    pub async fn wait_for_status(&self, order_id: Uuid, status: OrderStatus) -> Order {
        for _ in 0..100 {
            let order = self.order(order_id).await;
            if order.status == status {
                return order;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let order = self.order(order_id).await;
        panic!("order {} stuck in {}, expected {}", order_id, order.status, status);
    }

    /// Builds a provider webhook request signed with the configured secret.
    pub fn webhook_request(&self, event: &Value) -> Request<Body> {
        let payload = event.to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let header_value = stripe_signature(&payload, timestamp, "whsec_test");

        Request::builder()
            .method(Method::POST)
            .uri("/api/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .header("stripe-signature", header_value)
            .body(Body::from(payload))
            .unwrap()
    }

    pub fn job_callback_request(&self, callback: &Value, secret: &str) -> Request<Body> {
        let payload = callback.to_string();
        let sig = signature::sign(secret.as_bytes(), payload.as_bytes()).unwrap();

        Request::builder()
            .method(Method::POST)
            .uri("/api/jobs/callback")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-worker-signature", sig)
            .body(Body::from(payload))
            .unwrap()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn stripe_signature(payload: &str, timestamp: i64, secret: &str) -> String {
    let signed = format!("{}.{}", timestamp, payload);
    let v1 = signature::sign(secret.as_bytes(), signed.as_bytes()).unwrap();
    format!("t={},v1={}", timestamp, v1)
}

pub fn checkout_completed_event(order_id: Uuid, payment_intent: &str) -> Value {
    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": format!("cs_test_{}", order_id.simple()),
                "client_reference_id": order_id.to_string(),
                "payment_intent": payment_intent,
                "metadata": { "order_id": order_id.to_string() }
            }
        }
    })
}
