use std::sync::Arc;
use uuid::Uuid;

use crate::models::Notification;
use crate::services::authorization::{authorize, Action};
use crate::services::error::ServiceError;
use crate::services::jwt::Principal;
use crate::services::repository::Repository;

/// Writes and reads in-app notifications for order owners.
#[derive(Clone)]
pub struct Notifier {
    repo: Arc<dyn Repository>,
}

impl Notifier {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Best effort: a failed insert is logged and otherwise ignored.
    pub async fn notify(&self, user_id: Uuid, order_id: Option<Uuid>, message: impl Into<String>) {
        let notification = Notification::new(user_id, order_id, message);
        if let Err(e) = self.repo.insert_notification(&notification).await {
            tracing::warn!(
                user_id = %user_id,
                order_id = ?order_id,
                error = %e,
                "Failed to store notification"
            );
        }
    }

    pub async fn list(
        &self,
        principal: &Principal,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, ServiceError> {
        authorize(principal.role, Action::ViewOwnProfile)?;
        Ok(self
            .repo
            .list_notifications(principal.user_id, unread_only, limit)
            .await?)
    }

    pub async fn mark_read(
        &self,
        principal: &Principal,
        notification_id: Uuid,
    ) -> Result<Notification, ServiceError> {
        authorize(principal.role, Action::UpdateOwnProfile)?;
        Ok(self
            .repo
            .mark_notification_read(notification_id, principal.user_id)
            .await?)
    }
}
