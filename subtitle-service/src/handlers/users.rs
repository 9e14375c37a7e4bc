use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::auth::UpdateProfileRequest;
use crate::middleware::AuthUser;
use crate::models::User;
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.auth.profile(&principal).await?))
}

pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.auth.update_profile(&principal, req).await?))
}
