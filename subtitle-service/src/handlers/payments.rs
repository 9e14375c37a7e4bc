use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::payments::{CheckoutResponse, PaymentStatusResponse, WebhookAck};
use crate::middleware::AuthUser;
use crate::services::payments::STRIPE_SIGNATURE_HEADER;
use crate::AppState;

pub async fn create_checkout(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<CheckoutResponse>, AppError> {
    Ok(Json(state.payments.checkout(&principal, order_id).await?))
}

pub async fn payment_status(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    Ok(Json(state.payments.status(&principal, order_id).await?))
}

/// Unauthenticated; trust comes from the signature over the raw body.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let ack = state.payments.handle_webhook(signature, &body).await?;

    tracing::info!(
        event_type = %ack.event_type,
        result = ack.result.as_str(),
        "Webhook acknowledged"
    );

    Ok(Json(ack))
}
