use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::services::{AuthenticationError, Principal, ServiceError};
use crate::AppState;

/// Resolves the bearer token into a `Principal` stored in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ServiceError::from(AuthenticationError::MissingToken))?;

    let principal = state.jwt.verify(token).map_err(|e| {
        tracing::debug!(error = %e, "Bearer token rejected");
        ServiceError::from(e)
    })?;

    tracing::Span::current().record("user_id", tracing::field::display(principal.user_id));
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Handler-side access to the authenticated caller.
pub struct AuthUser(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(AuthenticationError::MissingToken))
            })
    }
}
