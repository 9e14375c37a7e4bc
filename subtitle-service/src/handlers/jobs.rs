use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Json};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::utils::signature;

use crate::dtos::jobs::{JobCallback, JobCallbackAccepted, JobCallbackStatus};
use crate::services::{AuthenticationError, ServiceError};
use crate::workers::JobEvent;
use crate::AppState;

pub const WORKER_SIGNATURE_HEADER: &str = "x-worker-signature";

/// Completion report from an external transcription worker. The event is
/// queued for the consumer; the order changes asynchronously.
pub async fn job_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JobCallbackAccepted>), AppError> {
    let provided = headers
        .get(WORKER_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| invalid_signature("missing signature header"))?;

    let secret = state.config.workers.callback_secret.expose_secret();
    if !signature::verify(secret.as_bytes(), &body, provided)? {
        tracing::warn!("Job callback signature mismatch");
        return Err(invalid_signature("signature mismatch"));
    }

    let callback: JobCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid callback payload: {}", e)))?;

    state.orders.find(callback.order_id).await?;

    let order_id = callback.order_id;
    let event = match callback.status {
        JobCallbackStatus::Succeeded => JobEvent::Succeeded {
            order_id,
            files: callback.files,
        },
        JobCallbackStatus::Failed => JobEvent::Failed {
            order_id,
            reason: callback
                .error
                .unwrap_or_else(|| "worker reported failure".to_string()),
        },
    };

    state.job_events.send(event).await.map_err(|_| {
        tracing::error!(order_id = %order_id, "Job event channel closed");
        AppError::ServiceUnavailable
    })?;

    tracing::info!(order_id = %order_id, status = ?callback.status, "Job callback accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCallbackAccepted {
            accepted: true,
            order_id,
        }),
    ))
}

fn invalid_signature(reason: &str) -> AppError {
    ServiceError::from(AuthenticationError::InvalidSignature(reason.to_string())).into()
}
