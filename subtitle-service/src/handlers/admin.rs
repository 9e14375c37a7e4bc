//! `/api/admin` routes. Mutations become `AdminCommand`s so that
//! `AdminService::execute` authorizes and audits every one of them. Bodies
//! are parsed here but rejected through `AdminService::reject_malformed`, so a
//! bad body is audited too and never hides a missing permission.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::{AppError, ErrorBody};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::admin::{
    AdminActionResponse, AdminStats, ChangeRoleRequest, QaStatusRequest, RefundRequest,
    ReprocessRequest, StatsQuery, UpdateOrderRequest, UpdateSettingRequest, UpdateUserRequest,
};
use crate::dtos::orders::OrderDetail;
use crate::middleware::AuthUser;
use crate::models::{
    AdminAction, AdminActionLog, AuditLogFilter, Order, OrderFilter, SystemSetting, User,
    UserFilter,
};
use crate::services::admin::{AdminCommandError, MalformedCommand};
use crate::services::{AdminCommand, AuditReceipt, Principal, ServiceError};
use crate::AppState;

#[derive(Serialize)]
struct AdminErrorBody {
    #[serde(flatten)]
    error: ErrorBody,
    audit: AuditReceipt,
}

impl IntoResponse for AdminCommandError {
    fn into_response(self) -> Response {
        let (status, error, _) = AppError::from(self.error).into_parts();
        (
            status,
            Json(AdminErrorBody {
                error,
                audit: self.audit,
            }),
        )
            .into_response()
    }
}

type AdminResult = Result<Json<AdminActionResponse>, AdminCommandError>;

/// Who an admin mutation is aimed at, known before the body is read.
struct Target {
    action: AdminAction,
    target_type: &'static str,
    target_id: String,
}

async fn run<T>(
    state: &AppState,
    principal: &Principal,
    target: Target,
    body: Result<Json<T>, JsonRejection>,
    build: impl FnOnce(T) -> AdminCommand,
) -> AdminResult
where
    T: Validate,
{
    let parsed = match body {
        Ok(Json(req)) => match req.validate() {
            Ok(()) => Ok(build(req)),
            Err(e) => Err(ServiceError::from(e)),
        },
        Err(rejection) => Err(ServiceError::Validation(format!(
            "Json parse error: {}",
            rejection.body_text()
        ))),
    };

    match parsed {
        Ok(command) => Ok(Json(state.admin.execute(principal, command).await?)),
        Err(error) => Err(state
            .admin
            .reject_malformed(
                principal,
                MalformedCommand {
                    action: target.action,
                    target_type: target.target_type,
                    target_id: target.target_id,
                    error,
                },
            )
            .await),
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.admin.list_users(&principal, &filter).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.admin.get_user(&principal, user_id).await?))
}

pub async fn change_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(user_id): Path<Uuid>,
    body: Result<Json<ChangeRoleRequest>, JsonRejection>,
) -> AdminResult {
    let target = Target {
        action: AdminAction::ChangeRole,
        target_type: "user",
        target_id: user_id.to_string(),
    };
    run(&state, &principal, target, body, |req| AdminCommand::ChangeRole {
        user_id,
        role: req.role,
    })
    .await
}

pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(user_id): Path<Uuid>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AdminResult {
    let target = Target {
        action: AdminAction::UpdateUser,
        target_type: "user",
        target_id: user_id.to_string(),
    };
    run(&state, &principal, target, body, |changes| {
        AdminCommand::UpdateUser { user_id, changes }
    })
    .await
}

pub async fn list_orders(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.admin.list_orders(&principal, &filter).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDetail>, AppError> {
    Ok(Json(state.admin.get_order(&principal, order_id).await?))
}

pub async fn update_order(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
    body: Result<Json<UpdateOrderRequest>, JsonRejection>,
) -> AdminResult {
    let target = Target {
        action: AdminAction::UpdateOrder,
        target_type: "order",
        target_id: order_id.to_string(),
    };
    run(&state, &principal, target, body, |req| AdminCommand::UpdateOrder {
        order_id,
        admin_notes: req.admin_notes,
    })
    .await
}

pub async fn reprocess_order(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
    body: Result<Json<ReprocessRequest>, JsonRejection>,
) -> AdminResult {
    let target = Target {
        action: AdminAction::ReprocessOrder,
        target_type: "order",
        target_id: order_id.to_string(),
    };
    run(&state, &principal, target, body, |req| AdminCommand::Reprocess {
        order_id,
        notes: req.notes,
    })
    .await
}

pub async fn refund_order(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(order_id): Path<Uuid>,
    body: Result<Json<RefundRequest>, JsonRejection>,
) -> AdminResult {
    let target = Target {
        action: AdminAction::RefundOrder,
        target_type: "order",
        target_id: order_id.to_string(),
    };
    run(&state, &principal, target, body, |req| AdminCommand::Refund {
        order_id,
        reason: req.reason,
    })
    .await
}

pub async fn update_qa_status(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(subtitle_id): Path<Uuid>,
    body: Result<Json<QaStatusRequest>, JsonRejection>,
) -> AdminResult {
    let target = Target {
        action: AdminAction::UpdateQaStatus,
        target_type: "subtitle_file",
        target_id: subtitle_id.to_string(),
    };
    run(&state, &principal, target, body, |req| AdminCommand::SetQaStatus {
        subtitle_id,
        status: req.qa_status,
        notes: req.notes,
    })
    .await
}

pub async fn list_logs(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(filter): Query<AuditLogFilter>,
) -> Result<Json<Vec<AdminActionLog>>, AppError> {
    Ok(Json(state.admin.list_logs(&principal, &filter).await?))
}

pub async fn stats(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(query): Query<StatsQuery>,
) -> Result<Json<AdminStats>, AppError> {
    Ok(Json(state.admin.stats(&principal, query.days_back).await?))
}

pub async fn list_settings(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<SystemSetting>>, AppError> {
    Ok(Json(state.admin.list_settings(&principal).await?))
}

pub async fn update_setting(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(key): Path<String>,
    body: Result<Json<UpdateSettingRequest>, JsonRejection>,
) -> AdminResult {
    let target = Target {
        action: AdminAction::UpdateSetting,
        target_type: "setting",
        target_id: key.clone(),
    };
    run(&state, &principal, target, body, |req| AdminCommand::UpdateSetting {
        key,
        value: req.value,
    })
    .await
}
