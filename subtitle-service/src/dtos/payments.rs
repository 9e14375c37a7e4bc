use serde::Serialize;
use uuid::Uuid;

use crate::models::{OrderStatus, PaymentStatus};

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_reference: Option<String>,
}

/// Body returned to the payment provider. Any 2xx stops redelivery.
#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookAck {
    pub received: bool,
    pub event_type: String,
    pub result: WebhookResult,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookResult {
    Processed,
    Duplicate,
    Ignored,
}

impl WebhookResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookResult::Processed => "processed",
            WebhookResult::Duplicate => "duplicate",
            WebhookResult::Ignored => "ignored",
        }
    }
}
