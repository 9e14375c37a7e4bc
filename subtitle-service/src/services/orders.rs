//! Order lifecycle.
//!
//! Status changes go through `OrderService::apply_event` only: the event is
//! resolved against the current status by `OrderStatus::apply` and then
//! written with a compare-and-set on that status. Losing the race surfaces as
//! `TransitionError::Stale`.

use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::orders::{CreateOrderRequest, ListOrdersQuery, OrderDetail};
use crate::models::{
    Order, OrderChanges, OrderEvent, OrderFilter, OrderStatus, SettingKey, SubtitleConfig,
    SubtitleFile, TransitionError,
};
use crate::services::authorization::{authorize, Action};
use crate::services::error::ServiceError;
use crate::services::jwt::Principal;
use crate::services::metrics;
use crate::services::notifications::Notifier;
use crate::services::repository::{OrderPatch, Repository, RepositoryError};

#[derive(Clone)]
pub struct OrderService {
    repo: Arc<dyn Repository>,
    notifier: Notifier,
    currency: String,
}

impl OrderService {
    pub fn new(repo: Arc<dyn Repository>, notifier: Notifier, currency: String) -> Self {
        Self {
            repo,
            notifier,
            currency,
        }
    }

    /// Current value of a numeric setting, falling back to its default when
    /// the stored value is missing or unreadable.
    pub async fn setting(&self, key: SettingKey) -> Result<i64, ServiceError> {
        let stored = self.repo.get_setting(key.as_str()).await?;
        Ok(match stored {
            Some(setting) => key.parse_value(&setting.value).unwrap_or_else(|e| {
                tracing::warn!(key = key.as_str(), error = %e, "Stored setting invalid, using default");
                key.default_value()
            }),
            None => key.default_value(),
        })
    }

    #[tracing::instrument(skip(self, principal, req), fields(user_id = %principal.user_id))]
    pub async fn create(
        &self,
        principal: &Principal,
        req: CreateOrderRequest,
    ) -> Result<Order, ServiceError> {
        authorize(principal.role, Action::ManageOwnOrders)?;

        let max_files = self.setting(SettingKey::MaxFilesPerOrder).await?;
        if req.videos.is_empty() || req.videos.len() as i64 > max_files {
            return Err(ServiceError::Validation(format!(
                "An order must contain between 1 and {} videos",
                max_files
            )));
        }

        let price_per_minute = self.setting(SettingKey::PricePerMinuteCents).await?;
        let order = Order::new(
            principal.user_id,
            req.videos,
            req.subtitle_config,
            price_per_minute,
            self.currency.clone(),
        )
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

        self.repo.insert_order(&order).await?;

        tracing::info!(
            order_id = %order.id,
            videos = order.videos.len(),
            total_amount_cents = order.total_amount_cents,
            "Order created"
        );

        self.notifier
            .notify(
                order.user_id,
                Some(order.id),
                format!("Order {} created", order.id),
            )
            .await;

        Ok(order)
    }

    pub async fn list_own(
        &self,
        principal: &Principal,
        query: &ListOrdersQuery,
    ) -> Result<Vec<Order>, ServiceError> {
        authorize(principal.role, Action::ViewOwnOrders)?;

        let filter = OrderFilter {
            user_id: Some(principal.user_id),
            status: query.status,
            payment_status: None,
            skip: query.skip,
            limit: query.limit,
        };
        Ok(self.repo.list_orders(&filter).await?)
    }

    /// Loads an order the caller owns. Other users' orders read as missing.
    pub async fn find_owned(
        &self,
        principal: &Principal,
        order_id: Uuid,
    ) -> Result<Order, ServiceError> {
        authorize(principal.role, Action::ViewOwnOrders)?;

        match self.repo.find_order(order_id).await? {
            Some(order) if order.is_owned_by(principal.user_id) => Ok(order),
            _ => Err(ServiceError::NotFound("Order".into())),
        }
    }

    pub async fn get_own(
        &self,
        principal: &Principal,
        order_id: Uuid,
    ) -> Result<OrderDetail, ServiceError> {
        let order = self.find_owned(principal, order_id).await?;
        let subtitles = self.repo.list_subtitle_files(order.id).await?;
        Ok(OrderDetail { order, subtitles })
    }

    pub async fn subtitles_own(
        &self,
        principal: &Principal,
        order_id: Uuid,
    ) -> Result<Vec<SubtitleFile>, ServiceError> {
        let order = self.find_owned(principal, order_id).await?;
        Ok(self.repo.list_subtitle_files(order.id).await?)
    }

    /// Replaces the subtitle configuration. Allowed only while `created`.
    pub async fn update_config(
        &self,
        principal: &Principal,
        order_id: Uuid,
        config: SubtitleConfig,
    ) -> Result<Order, ServiceError> {
        authorize(principal.role, Action::ManageOwnOrders)?;
        self.find_owned(principal, order_id).await?;

        let patch = OrderPatch {
            subtitle_config: Some(config),
            ..Default::default()
        };

        match self
            .repo
            .patch_order(order_id, &patch, Some(OrderStatus::Created))
            .await
        {
            Ok(order) => Ok(order),
            Err(RepositoryError::StatusMismatch { actual }) => Err(ServiceError::Conflict(format!(
                "Order is '{}'; configuration can only change while it is '{}'",
                actual,
                OrderStatus::Created
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.repo
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order".into()))
    }

    pub async fn detail(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = self.find(order_id).await?;
        let subtitles = self.repo.list_subtitle_files(order.id).await?;
        Ok(OrderDetail { order, subtitles })
    }

    pub async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, ServiceError> {
        Ok(self.repo.list_orders(filter).await?)
    }

    pub async fn patch(
        &self,
        order_id: Uuid,
        patch: &OrderPatch,
        only_in: Option<OrderStatus>,
    ) -> Result<Order, ServiceError> {
        Ok(self.repo.patch_order(order_id, patch, only_in).await?)
    }

    /// Drives `event` through the state machine and persists the result.
    #[tracing::instrument(skip(self, changes))]
    pub async fn apply_event(
        &self,
        order_id: Uuid,
        event: OrderEvent,
        changes: OrderChanges,
    ) -> Result<Order, ServiceError> {
        let order = self.find(order_id).await?;
        let from = order.status;
        let to = from.apply(event)?;

        let updated = match self
            .repo
            .transition_order(order_id, from, to, &changes)
            .await
        {
            Ok(updated) => updated,
            Err(RepositoryError::StatusMismatch { actual }) => {
                tracing::warn!(
                    expected = %from,
                    actual = %actual,
                    "Order changed concurrently, transition rejected"
                );
                return Err(TransitionError::Stale {
                    expected: from,
                    actual,
                    event,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        metrics::record_transition(from.as_str(), to.as_str());
        tracing::info!(from = %from, to = %to, "Order transitioned");

        self.notifier
            .notify(updated.user_id, Some(updated.id), transition_message(&updated, event))
            .await;

        Ok(updated)
    }
}

fn transition_message(order: &Order, event: OrderEvent) -> String {
    match event {
        OrderEvent::PaymentConfirmed => format!("Payment received for order {}", order.id),
        OrderEvent::JobStarted => format!("Processing started for order {}", order.id),
        OrderEvent::Reprocess => format!("Order {} is being processed again", order.id),
        OrderEvent::JobSucceeded => format!("Subtitles for order {} are ready", order.id),
        OrderEvent::JobFailed => format!("Processing failed for order {}", order.id),
        OrderEvent::Refund => format!("Order {} has been refunded", order.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentStatus, Role, VideoRef};
    use crate::services::repository::{MemoryRepository, NotificationRepository, SettingsRepository};

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "owner@example.com".into(),
            role,
            token_id: "jti".into(),
        }
    }

    fn video(seconds: i64) -> VideoRef {
        VideoRef {
            id: Uuid::new_v4(),
            original_filename: "clip.mp4".into(),
            storage_key: "videos/clip.mp4".into(),
            duration_seconds: seconds,
        }
    }

    async fn service() -> (OrderService, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let seeds: Vec<_> = SettingKey::ALL.iter().map(|k| k.seed()).collect();
        repo.seed_settings(&seeds).await.unwrap();
        let service = OrderService::new(repo.clone(), Notifier::new(repo.clone()), "usd".into());
        (service, repo)
    }

    fn request(videos: Vec<VideoRef>) -> CreateOrderRequest {
        CreateOrderRequest {
            videos,
            subtitle_config: SubtitleConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_create_prices_from_settings() {
        let (service, repo) = service().await;
        repo.update_setting("price_per_minute_cents", "200", Uuid::new_v4())
            .await
            .unwrap();
        let owner = principal(Role::User);

        let order = service
            .create(&owner, request(vec![video(90)]))
            .await
            .unwrap();

        assert_eq!(order.total_amount_cents, 300);
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(
            repo.list_notifications(owner.user_id, false, 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_create_enforces_file_limit() {
        let (service, repo) = service().await;
        repo.update_setting("max_files_per_order", "1", Uuid::new_v4())
            .await
            .unwrap();

        let result = service
            .create(&principal(Role::User), request(vec![video(10), video(10)]))
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_unpriceable_total() {
        let (service, repo) = service().await;
        repo.update_setting("price_per_minute_cents", &i64::MAX.to_string(), Uuid::new_v4())
            .await
            .unwrap();
        let owner = principal(Role::User);

        let result = service
            .create(&owner, request(vec![video(86_400), video(86_400)]))
            .await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert!(service
            .list_own(&owner, &ListOrdersQuery { status: None, skip: 0, limit: 10 })
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_other_users_order_reads_as_missing() {
        let (service, _) = service().await;
        let order = service
            .create(&principal(Role::User), request(vec![video(10)]))
            .await
            .unwrap();

        let result = service.get_own(&principal(Role::User), order.id).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_config_locked_after_payment() {
        let (service, _) = service().await;
        let owner = principal(Role::User);
        let order = service
            .create(&owner, request(vec![video(10)]))
            .await
            .unwrap();

        let mut config = SubtitleConfig::default();
        config.max_chars_per_line = 32;
        let updated = service
            .update_config(&owner, order.id, config.clone())
            .await
            .unwrap();
        assert_eq!(updated.subtitle_config.max_chars_per_line, 32);

        service
            .apply_event(order.id, OrderEvent::PaymentConfirmed, OrderChanges::default())
            .await
            .unwrap();

        let result = service.update_config(&owner, order.id, config).await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_apply_event_follows_lifecycle() {
        let (service, _) = service().await;
        let order = service
            .create(&principal(Role::User), request(vec![video(10)]))
            .await
            .unwrap();

        let paid = service
            .apply_event(
                order.id,
                OrderEvent::PaymentConfirmed,
                OrderChanges {
                    payment_status: Some(PaymentStatus::Paid),
                    payment_reference: Some("pi_123".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_reference.as_deref(), Some("pi_123"));

        let refund = service
            .apply_event(order.id, OrderEvent::Refund, OrderChanges::default())
            .await;
        assert!(matches!(
            refund,
            Err(ServiceError::InvalidTransition(TransitionError::NotAllowed {
                from: OrderStatus::Paid,
                event: OrderEvent::Refund
            }))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_one_wins() {
        let (service, _) = service().await;
        let order = service
            .create(&principal(Role::User), request(vec![video(10)]))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .apply_event(order.id, OrderEvent::PaymentConfirmed, OrderChanges::default())
                        .await
                })
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(ServiceError::InvalidTransition(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(succeeded, 1);
    }
}
