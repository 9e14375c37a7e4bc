use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::orders::{CreateOrderRequest, ListOrdersQuery, OrderDetail, UpdateConfigRequest};
use crate::middleware::AuthUser;
use crate::models::{Order, SubtitleFile};
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn create_order(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state.orders.create(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders.list_own(&principal, &query).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDetail>, AppError> {
    Ok(Json(state.orders.get_own(&principal, order_id).await?))
}

pub async fn update_config(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateConfigRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .update_config(&principal, order_id, req.subtitle_config)
        .await?;
    Ok(Json(order))
}

pub async fn list_subtitles(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<SubtitleFile>>, AppError> {
    Ok(Json(state.orders.subtitles_own(&principal, order_id).await?))
}
