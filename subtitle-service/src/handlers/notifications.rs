use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::notifications::ListNotificationsQuery;
use crate::middleware::AuthUser;
use crate::models::Notification;
use crate::AppState;

pub async fn list_notifications(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let notifications = state
        .notifier
        .list(&principal, query.unread_only, query.limit.clamp(1, 200))
        .await?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(state.notifier.mark_read(&principal, notification_id).await?))
}
