use service_core::error::AppError;
use thiserror::Error;

use crate::models::TransitionError;
use crate::services::authorization::AuthorizationError;
use crate::services::jwt::AuthenticationError;
use crate::services::repository::RepositoryError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// A payment or transcription provider call failed. The caller may retry.
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ServiceError::NotFound(what),
            RepositoryError::Conflict(msg) => ServiceError::Conflict(msg),
            RepositoryError::StatusMismatch { actual } => {
                ServiceError::Conflict(format!("order status changed concurrently to '{}'", actual))
            }
            RepositoryError::Database(e) => ServiceError::Storage(e),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Authentication(e) => AppError::Unauthorized(anyhow::anyhow!(e)),
            ServiceError::Authorization(e) => AppError::Forbidden(anyhow::anyhow!(e)),
            ServiceError::InvalidTransition(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::ExternalService(msg) => AppError::BadGateway(msg),
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::InvalidInput(e) => AppError::ValidationError(e),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::Storage(e) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
