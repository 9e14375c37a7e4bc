use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::dashboard::{DashboardOverview, Download, RecentOrder, RecentOrdersQuery};
use crate::middleware::AuthUser;
use crate::AppState;

pub async fn overview(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<DashboardOverview>, AppError> {
    Ok(Json(state.dashboard.overview(&principal).await?))
}

pub async fn recent_orders(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(query): Query<RecentOrdersQuery>,
) -> Result<Json<Vec<RecentOrder>>, AppError> {
    Ok(Json(
        state
            .dashboard
            .recent_orders(&principal, query.limit)
            .await?,
    ))
}

pub async fn downloads(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<Download>>, AppError> {
    Ok(Json(state.dashboard.downloads(&principal).await?))
}
