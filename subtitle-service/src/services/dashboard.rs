//! The caller's own summary: order counts, recent orders and downloadable files.
//!
//! Every query is scoped to `Principal::user_id`; nothing here reads another
//! account's orders.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::dashboard::{DashboardOverview, Download, RecentOrder};
use crate::models::{Order, OrderFilter, OrderStatus};
use crate::services::authorization::{authorize, Action};
use crate::services::error::ServiceError;
use crate::services::jwt::Principal;
use crate::services::repository::Repository;

const MAX_RECENT_ORDERS: i64 = 50;
const MAX_DOWNLOAD_ORDERS: i64 = 500;

#[derive(Clone)]
pub struct DashboardService {
    repo: Arc<dyn Repository>,
}

impl DashboardService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn overview(&self, principal: &Principal) -> Result<DashboardOverview, ServiceError> {
        authorize(principal.role, Action::ViewOwnOrders)?;

        let stats = self.repo.order_stats(None, Some(principal.user_id)).await?;
        let count = |status: OrderStatus| {
            stats
                .orders_by_status
                .get(status.as_str())
                .copied()
                .unwrap_or(0)
        };

        Ok(DashboardOverview {
            total_orders: stats.total_orders,
            processing_orders: count(OrderStatus::Processing),
            completed_orders: count(OrderStatus::Completed),
            total_spent_cents: stats.revenue_cents,
            orders_by_status: stats.orders_by_status,
        })
    }

    /// Newest orders first. `limit` is clamped to 1..=50.
    pub async fn recent_orders(
        &self,
        principal: &Principal,
        limit: i64,
    ) -> Result<Vec<RecentOrder>, ServiceError> {
        authorize(principal.role, Action::ViewOwnOrders)?;

        let filter = OrderFilter {
            user_id: Some(principal.user_id),
            limit: limit.clamp(1, MAX_RECENT_ORDERS),
            ..Default::default()
        };
        let orders = self.repo.list_orders(&filter).await?;
        Ok(orders.into_iter().map(RecentOrder::from).collect())
    }

    /// Files generated for the caller's completed orders, newest first.
    pub async fn downloads(&self, principal: &Principal) -> Result<Vec<Download>, ServiceError> {
        authorize(principal.role, Action::ViewOwnOrders)?;

        let filter = OrderFilter {
            user_id: Some(principal.user_id),
            status: Some(OrderStatus::Completed),
            limit: MAX_DOWNLOAD_ORDERS,
            ..Default::default()
        };
        let orders: HashMap<Uuid, Order> = self
            .repo
            .list_orders(&filter)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = orders.keys().copied().collect();
        let files = self.repo.list_subtitle_files_for_orders(&ids).await?;
        Ok(files
            .into_iter()
            .filter_map(|file| {
                let order = orders.get(&file.order_id)?;
                Some(Download::new(file, order))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        OrderChanges, OrderEvent, OutputFormat, PaymentStatus, Role, SubtitleConfig,
        SubtitleFile, VideoRef,
    };
    use crate::services::notifications::Notifier;
    use crate::services::orders::OrderService;
    use crate::services::repository::{MemoryRepository, OrderRepository};

    fn principal() -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "viewer@example.com".into(),
            role: Role::User,
            token_id: "jti".into(),
        }
    }

    fn order_for(user_id: Uuid, filename: &str, seconds: i64) -> Order {
        Order::new(
            user_id,
            vec![VideoRef {
                id: Uuid::new_v4(),
                original_filename: filename.into(),
                storage_key: format!("videos/{filename}"),
                duration_seconds: seconds,
            }],
            SubtitleConfig::default(),
            100,
            "usd".into(),
        )
        .unwrap()
    }

    struct Fixture {
        dashboard: DashboardService,
        orders: OrderService,
        repo: Arc<MemoryRepository>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(MemoryRepository::new());
        Fixture {
            dashboard: DashboardService::new(repo.clone()),
            orders: OrderService::new(repo.clone(), Notifier::new(repo.clone()), "usd".into()),
            repo,
        }
    }

    /// Inserts an order and drives it to `completed` with one generated file.
    async fn completed(f: &Fixture, order: Order) -> Order {
        f.repo.insert_order(&order).await.unwrap();
        let video_id = order.videos[0].id;
        for (event, changes) in [
            (
                OrderEvent::PaymentConfirmed,
                OrderChanges {
                    payment_status: Some(PaymentStatus::Paid),
                    payment_reference: Some("pi_dash".into()),
                    ..Default::default()
                },
            ),
            (OrderEvent::JobStarted, OrderChanges::default()),
            (
                OrderEvent::JobSucceeded,
                OrderChanges {
                    subtitle_files: vec![SubtitleFile::generated(
                        order.id,
                        Some(video_id),
                        OutputFormat::Srt,
                        format!("subtitles/{}/out.srt", order.id),
                    )],
                    ..Default::default()
                },
            ),
        ] {
            f.orders.apply_event(order.id, event, changes).await.unwrap();
        }
        f.orders.find(order.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_overview_counts_only_own_orders() {
        let f = fixture();
        let me = principal();
        let someone_else = principal();

        completed(&f, order_for(me.user_id, "a.mp4", 90)).await;
        f.repo
            .insert_order(&order_for(me.user_id, "b.mp4", 60))
            .await
            .unwrap();
        completed(&f, order_for(someone_else.user_id, "c.mp4", 600)).await;

        let overview = f.dashboard.overview(&me).await.unwrap();
        assert_eq!(overview.total_orders, 2);
        assert_eq!(overview.completed_orders, 1);
        assert_eq!(overview.processing_orders, 0);
        assert_eq!(overview.orders_by_status.get("created"), Some(&1));
        // 90 seconds at 100 cents per minute; the unpaid order does not count.
        assert_eq!(overview.total_spent_cents, 150);
    }

    #[tokio::test]
    async fn test_recent_orders_are_newest_first_and_clamped() {
        let f = fixture();
        let me = principal();
        for name in ["first.mp4", "second.mp4", "third.mp4"] {
            f.repo
                .insert_order(&order_for(me.user_id, name, 60))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let recent = f.dashboard.recent_orders(&me, 2).await.unwrap();
        let titles: Vec<_> = recent.iter().map(|o| o.video_title.as_str()).collect();
        assert_eq!(titles, vec!["third.mp4", "second.mp4"]);

        let at_least_one = f.dashboard.recent_orders(&me, 0).await.unwrap();
        assert_eq!(at_least_one.len(), 1);
    }

    #[tokio::test]
    async fn test_downloads_list_files_of_completed_orders() {
        let f = fixture();
        let me = principal();
        let order = completed(&f, order_for(me.user_id, "talk.mp4", 60)).await;
        f.repo
            .insert_order(&order_for(me.user_id, "pending.mp4", 60))
            .await
            .unwrap();
        completed(&f, order_for(Uuid::new_v4(), "foreign.mp4", 60)).await;

        let downloads = f.dashboard.downloads(&me).await.unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].order_id, order.id);
        assert_eq!(downloads[0].video_name.as_deref(), Some("talk.mp4"));
        assert_eq!(downloads[0].file_name, "out.srt");
        assert_eq!(downloads[0].format, OutputFormat::Srt);
    }

    #[tokio::test]
    async fn test_empty_dashboard() {
        let f = fixture();
        let me = principal();

        let overview = f.dashboard.overview(&me).await.unwrap();
        assert_eq!(overview.total_orders, 0);
        assert_eq!(overview.total_spent_cents, 0);
        assert!(f.dashboard.recent_orders(&me, 5).await.unwrap().is_empty());
        assert!(f.dashboard.downloads(&me).await.unwrap().is_empty());
    }
}
