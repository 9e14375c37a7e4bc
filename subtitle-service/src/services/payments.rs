//! Payment provider client and webhook processing.
//!
//! Checkout sessions and refunds go through the `PaymentProvider` trait;
//! `StripeClient` is the production implementation. Webhooks are verified
//! against the `Stripe-Signature` header before any event is looked at.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::observability::outbound_headers;
use service_core::utils::signature;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::StripeConfig;
use crate::dtos::payments::{CheckoutResponse, PaymentStatusResponse, WebhookAck, WebhookResult};
use crate::models::{Order, OrderChanges, OrderEvent, OrderStatus, PaymentStatus};
use crate::services::authorization::{authorize, Action};
use crate::services::error::ServiceError;
use crate::services::jwt::{AuthenticationError, Principal};
use crate::services::metrics;
use crate::services::notifications::Notifier;
use crate::services::orders::OrderService;
use crate::services::repository::OrderPatch;
use crate::workers::{JobQueue, JobTrigger, TranscriptionJob};

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider credentials not configured")]
    NotConfigured,

    #[error("payment provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("payment provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

impl From<PaymentError> for ServiceError {
    fn from(err: PaymentError) -> Self {
        ServiceError::ExternalService(err.to_string())
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(&self, order: &Order) -> Result<CheckoutSession, PaymentError>;

    /// Refunds `amount_cents` of the payment identified by `payment_reference`.
    /// Repeating a call with the same `idempotency_key` must not move money twice.
    async fn refund(
        &self,
        payment_reference: &str,
        amount_cents: i64,
        reason: Option<&str>,
        idempotency_key: &str,
    ) -> Result<RefundReceipt, PaymentError>;
}

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefundResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

/// Stripe REST client using form-encoded requests.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty()
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, PaymentError> {
        if !self.is_configured() {
            return Err(PaymentError::NotConfigured);
        }

        let url = format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path);
        let mut request = self
            .client
            .post(&url)
            .headers(outbound_headers(None))
            .bearer_auth(self.config.api_key.expose_secret())
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, path = %path, "Stripe response");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| PaymentError::InvalidResponse(e.to_string()))
        } else {
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .map(|b| {
                    format!(
                        "{} ({})",
                        b.error.message.unwrap_or_default(),
                        b.error.code.unwrap_or_else(|| "unknown".into())
                    )
                })
                .unwrap_or(body);
            tracing::error!(status = %status, path = %path, error = %message, "Stripe request failed");
            Err(PaymentError::Provider {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(&self, order: &Order) -> Result<CheckoutSession, PaymentError> {
        let frontend = self.config.frontend_url.trim_end_matches('/');
        let form = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                order.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                order.total_amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                format!("Subtitle order {}", order.id),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "success_url".to_string(),
                format!(
                    "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}&order_id={}",
                    frontend, order.id
                ),
            ),
            (
                "cancel_url".to_string(),
                format!("{}/payment/cancel?order_id={}", frontend, order.id),
            ),
            ("client_reference_id".to_string(), order.id.to_string()),
            ("metadata[order_id]".to_string(), order.id.to_string()),
            ("metadata[user_id]".to_string(), order.user_id.to_string()),
            (
                "payment_intent_data[metadata][order_id]".to_string(),
                order.id.to_string(),
            ),
        ];

        let session: StripeSessionResponse = self
            .post_form("/checkout/sessions", &form, None)
            .await?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::InvalidResponse("checkout session has no url".into()))?;

        tracing::info!(order_id = %order.id, session_id = %session.id, "Checkout session created");

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn refund(
        &self,
        payment_reference: &str,
        amount_cents: i64,
        reason: Option<&str>,
        idempotency_key: &str,
    ) -> Result<RefundReceipt, PaymentError> {
        let mut form = vec![
            ("payment_intent".to_string(), payment_reference.to_string()),
            ("amount".to_string(), amount_cents.to_string()),
        ];
        if let Some(reason) = reason {
            form.push(("metadata[reason]".to_string(), reason.to_string()));
        }

        let refund: StripeRefundResponse = self
            .post_form("/refunds", &form, Some(idempotency_key))
            .await?;

        tracing::info!(
            payment_reference = %payment_reference,
            refund_id = %refund.id,
            status = %refund.status,
            "Refund created"
        );

        Ok(RefundReceipt {
            id: refund.id,
            status: refund.status,
        })
    }
}

/// In-process provider for tests and local runs. Refunds honour idempotency
/// keys the way Stripe does: a repeated key returns the first receipt.
#[derive(Default)]
pub struct MockPaymentProvider {
    fail: AtomicBool,
    latency_ms: AtomicU64,
    refunds: Mutex<Vec<(String, i64)>>,
    refund_keys: Mutex<HashMap<String, RefundReceipt>>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later provider call fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delays every later refund, to hold requests in flight.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// `(payment_reference, amount_cents)` of each refund that moved money.
    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.refunds
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), PaymentError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(PaymentError::Provider {
                status: 503,
                message: "provider unavailable".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(&self, order: &Order) -> Result<CheckoutSession, PaymentError> {
        self.check()?;
        Ok(CheckoutSession {
            id: format!("cs_test_{}", order.id.simple()),
            url: format!("https://checkout.test/pay/{}", order.id),
        })
    }

    async fn refund(
        &self,
        payment_reference: &str,
        amount_cents: i64,
        _reason: Option<&str>,
        idempotency_key: &str,
    ) -> Result<RefundReceipt, PaymentError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check()?;

        let mut keys = self
            .refund_keys
            .lock()
            .map_err(|_| PaymentError::InvalidResponse("mock provider poisoned".into()))?;
        if let Some(receipt) = keys.get(idempotency_key) {
            return Ok(receipt.clone());
        }

        let receipt = RefundReceipt {
            id: format!("re_test_{}", Uuid::new_v4().simple()),
            status: "succeeded".into(),
        };
        keys.insert(idempotency_key.to_string(), receipt.clone());
        if let Ok(mut refunds) = self.refunds.lock() {
            refunds.push((payment_reference.to_string(), amount_cents));
        }
        Ok(receipt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookSignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

impl From<WebhookSignatureError> for ServiceError {
    fn from(err: WebhookSignatureError) -> Self {
        ServiceError::Authentication(AuthenticationError::InvalidSignature(err.to_string()))
    }
}

/// Verifies a `t=<unix>,v1=<hex>` header: HMAC-SHA256 over `"{t}.{payload}"`.
/// Any one matching `v1` entry is accepted.
pub fn verify_stripe_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), WebhookSignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse().map_err(|_| WebhookSignatureError::Malformed)?)
            }
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookSignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(WebhookSignatureError::Malformed);
    }
    if (now - timestamp).abs() > tolerance_seconds {
        return Err(WebhookSignatureError::Expired);
    }

    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);

    for candidate in candidates {
        if signature::verify(secret.as_bytes(), &signed, candidate)
            .map_err(|_| WebhookSignatureError::Malformed)?
        {
            return Ok(());
        }
    }

    Err(WebhookSignatureError::Mismatch)
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    /// Order id from `metadata.order_id`, falling back to `client_reference_id`.
    pub fn order_id(&self) -> Option<Uuid> {
        let object = &self.data.object;
        object
            .pointer("/metadata/order_id")
            .and_then(|v| v.as_str())
            .or_else(|| object.get("client_reference_id").and_then(|v| v.as_str()))
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Payment intent id: the object itself for `payment_intent.*`, the
    /// `payment_intent` field for checkout sessions.
    pub fn payment_reference(&self) -> Option<String> {
        let object = &self.data.object;
        if self.event_type.starts_with("payment_intent.") {
            object.get("id").and_then(|v| v.as_str()).map(str::to_string)
        } else {
            object
                .get("payment_intent")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    orders: OrderService,
    provider: Arc<dyn PaymentProvider>,
    jobs: JobQueue,
    notifier: Notifier,
    webhook_secret: Secret<String>,
    tolerance_seconds: i64,
}

impl PaymentService {
    pub fn new(
        orders: OrderService,
        provider: Arc<dyn PaymentProvider>,
        jobs: JobQueue,
        notifier: Notifier,
        config: &StripeConfig,
    ) -> Self {
        Self {
            orders,
            provider,
            jobs,
            notifier,
            webhook_secret: config.webhook_secret.clone(),
            tolerance_seconds: config.webhook_tolerance_seconds,
        }
    }

    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn checkout(
        &self,
        principal: &Principal,
        order_id: Uuid,
    ) -> Result<CheckoutResponse, ServiceError> {
        authorize(principal.role, Action::ManageOwnOrders)?;
        let order = self.orders.find_owned(principal, order_id).await?;

        if order.status != OrderStatus::Created || order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::Conflict(format!(
                "Order is '{}' and cannot be paid again",
                order.status
            )));
        }

        let session = self.provider.create_checkout_session(&order).await?;

        let patch = OrderPatch {
            checkout_session_id: Some(session.id.clone()),
            ..Default::default()
        };
        self.orders
            .patch(order.id, &patch, Some(OrderStatus::Created))
            .await?;

        Ok(CheckoutResponse {
            order_id: order.id,
            session_id: session.id,
            checkout_url: session.url,
            amount_cents: order.total_amount_cents,
            currency: order.currency,
        })
    }

    pub async fn status(
        &self,
        principal: &Principal,
        order_id: Uuid,
    ) -> Result<PaymentStatusResponse, ServiceError> {
        let order = self.orders.find_owned(principal, order_id).await?;
        Ok(PaymentStatusResponse {
            order_id: order.id,
            status: order.status,
            payment_status: order.payment_status,
            amount_cents: order.total_amount_cents,
            currency: order.currency,
            payment_reference: order.payment_reference,
        })
    }

    /// Verifies and applies one webhook delivery.
    pub async fn handle_webhook(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookAck, ServiceError> {
        let header = signature_header.ok_or(WebhookSignatureError::Missing)?;
        verify_stripe_signature(
            header,
            payload,
            self.webhook_secret.expose_secret(),
            self.tolerance_seconds,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| {
            tracing::warn!(error = %e, "Webhook signature rejected");
            e
        })?;

        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::Validation(format!("Invalid webhook payload: {}", e)))?;

        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Processing webhook");

        let result = match event.event_type.as_str() {
            "checkout.session.completed" | "payment_intent.succeeded" => {
                self.confirm_payment(&event).await?
            }
            "payment_intent.payment_failed" => self.payment_failed(&event).await?,
            "checkout.session.expired" => self.session_expired(&event).await?,
            other => {
                tracing::debug!(event_type = %other, "Unhandled webhook event type");
                WebhookResult::Ignored
            }
        };

        metrics::record_webhook_event(&event.event_type, result.as_str());

        Ok(WebhookAck {
            received: true,
            event_type: event.event_type,
            result,
        })
    }

    async fn event_order(&self, event: &StripeEvent) -> Result<Option<Order>, ServiceError> {
        let Some(order_id) = event.order_id() else {
            tracing::warn!(event_id = %event.id, "Webhook event carries no order id");
            return Ok(None);
        };

        match self.orders.find(order_id).await {
            Ok(order) => Ok(Some(order)),
            Err(ServiceError::NotFound(_)) => {
                tracing::warn!(order_id = %order_id, "Webhook for unknown order");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn confirm_payment(&self, event: &StripeEvent) -> Result<WebhookResult, ServiceError> {
        let Some(order) = self.event_order(event).await? else {
            return Ok(WebhookResult::Ignored);
        };

        if order.status != OrderStatus::Created {
            tracing::info!(order_id = %order.id, status = %order.status, "Payment already applied");
            return Ok(WebhookResult::Duplicate);
        }

        let changes = OrderChanges {
            payment_status: Some(PaymentStatus::Paid),
            payment_reference: event.payment_reference(),
            ..Default::default()
        };

        match self
            .orders
            .apply_event(order.id, OrderEvent::PaymentConfirmed, changes)
            .await
        {
            Ok(_) => {}
            // A concurrent delivery of the same payment won the race.
            Err(ServiceError::InvalidTransition(e)) => {
                tracing::info!(order_id = %order.id, error = %e, "Payment already applied");
                return Ok(WebhookResult::Duplicate);
            }
            Err(e) => return Err(e),
        }

        self.enqueue_after_payment(order.id).await;
        Ok(WebhookResult::Processed)
    }

    /// Queues the transcription job for a freshly paid order. If the queue
    /// rejects it, the order is failed so an admin can reprocess it.
    async fn enqueue_after_payment(&self, order_id: Uuid) {
        let job = TranscriptionJob {
            order_id,
            trigger: JobTrigger::Payment,
        };

        if let Err(e) = self.jobs.submit(job) {
            tracing::error!(order_id = %order_id, error = %e, "Failed to queue transcription job");
            for event in [OrderEvent::JobStarted, OrderEvent::JobFailed] {
                if let Err(e) = self
                    .orders
                    .apply_event(order_id, event, OrderChanges::default())
                    .await
                {
                    tracing::error!(order_id = %order_id, error = %e, "Failed to mark unqueued order as failed");
                    break;
                }
            }
        }
    }

    async fn payment_failed(&self, event: &StripeEvent) -> Result<WebhookResult, ServiceError> {
        let Some(order) = self.event_order(event).await? else {
            return Ok(WebhookResult::Ignored);
        };

        // The order stays `created` so the customer can retry checkout; only
        // the payment status records the decline.
        let patch = OrderPatch {
            payment_status: Some(PaymentStatus::Failed),
            ..Default::default()
        };

        match self
            .orders
            .patch(order.id, &patch, Some(OrderStatus::Created))
            .await
        {
            Ok(_) => {
                self.notifier
                    .notify(
                        order.user_id,
                        Some(order.id),
                        format!("Payment failed for order {}", order.id),
                    )
                    .await;
                Ok(WebhookResult::Processed)
            }
            Err(ServiceError::Conflict(_)) => Ok(WebhookResult::Duplicate),
            Err(e) => Err(e),
        }
    }

    async fn session_expired(&self, event: &StripeEvent) -> Result<WebhookResult, ServiceError> {
        let Some(order) = self.event_order(event).await? else {
            return Ok(WebhookResult::Ignored);
        };

        self.notifier
            .notify(
                order.user_id,
                Some(order.id),
                format!("Payment session expired for order {}", order.id),
            )
            .await;
        Ok(WebhookResult::Processed)
    }
}
