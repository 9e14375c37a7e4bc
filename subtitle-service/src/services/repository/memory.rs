use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    page, AuditLogRepository, NotificationRepository, OrderPatch, OrderRepository, OrderStats,
    Repository, RepositoryError, SettingsRepository, SubtitleRepository, UserCounts,
    UserRepository,
};
use crate::models::{
    AdminActionLog, AuditLogFilter, Notification, Order, OrderChanges, OrderFilter, OrderStatus,
    PaymentStatus, QaStatus, SubtitleFile, SystemSetting, User, UserFilter,
};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    orders: HashMap<Uuid, Order>,
    subtitles: HashMap<Uuid, SubtitleFile>,
    audit_log: Vec<AdminActionLog>,
    settings: BTreeMap<String, SystemSetting>,
    notifications: Vec<Notification>,
}

/// In-process repository. One mutex guards all tables, so every method is
/// atomic with respect to every other.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    fail_audit_appends: AtomicBool,
    fail_subtitle_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent audit appends fail, for exercising audit-outage paths.
    pub fn set_audit_failure(&self, fail: bool) {
        self.fail_audit_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes order transitions that carry subtitle files fail.
    pub fn set_subtitle_failure(&self, fail: bool) {
        self.fail_subtitle_writes.store(fail, Ordering::SeqCst);
    }

    fn check_subtitle_writes(&self, files: &[SubtitleFile]) -> Result<(), RepositoryError> {
        if !files.is_empty() && self.fail_subtitle_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(anyhow::anyhow!(
                "subtitle storage unavailable"
            )));
        }
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Database(anyhow::anyhow!("memory store lock poisoned")))
    }
}

fn paginate<T>(items: Vec<T>, skip: i64, limit: i64) -> Vec<T> {
    let (skip, limit) = page(skip, limit);
    items
        .into_iter()
        .skip(skip as usize)
        .take(limit as usize)
        .collect()
}

fn email_taken(state: &MemoryState, email: &str, except: Option<Uuid>) -> bool {
    state
        .users
        .values()
        .any(|u| u.email.eq_ignore_ascii_case(email) && Some(u.id) != except)
}

#[async_trait]
impl UserRepository for MemoryRepository {
    async fn insert_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if email_taken(&state, &user.email, None) {
            return Err(RepositoryError::Conflict("Email already registered".into()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<User, RepositoryError> {
        let mut state = self.state()?;
        if !state.users.contains_key(&user.id) {
            return Err(RepositoryError::NotFound("User".into()));
        }
        if email_taken(&state, &user.email, Some(user.id)) {
            return Err(RepositoryError::Conflict("Email already registered".into()));
        }
        let mut updated = user.clone();
        updated.updated_at = Utc::now();
        state.users.insert(user.id, updated.clone());
        Ok(updated)
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, RepositoryError> {
        let state = self.state()?;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| filter.role.map_or(true, |r| u.role == r))
            .filter(|u| filter.is_active.map_or(true, |a| u.is_active == a))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(users, filter.skip, filter.limit))
    }

    async fn count_users(&self) -> Result<UserCounts, RepositoryError> {
        let state = self.state()?;
        Ok(UserCounts {
            total_users: state.users.len() as i64,
            active_users: state.users.values().filter(|u| u.is_active).count() as i64,
        })
    }
}

#[async_trait]
impl OrderRepository for MemoryRepository {
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        self.state()?.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        Ok(self.state()?.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state()?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| filter.user_id.map_or(true, |id| o.user_id == id))
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .filter(|o| filter.payment_status.map_or(true, |s| o.payment_status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(orders, filter.skip, filter.limit))
    }

    async fn transition_order(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
        changes: &OrderChanges,
    ) -> Result<Order, RepositoryError> {
        let mut guard = self.state()?;
        let MemoryState {
            orders, subtitles, ..
        } = &mut *guard;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound("Order".into()))?;

        if order.status != expected {
            return Err(RepositoryError::StatusMismatch {
                actual: order.status,
            });
        }
        self.check_subtitle_writes(&changes.subtitle_files)?;

        order.status = next;
        if let Some(payment_status) = changes.payment_status {
            order.payment_status = payment_status;
        }
        if let Some(reference) = &changes.payment_reference {
            order.payment_reference = Some(reference.clone());
        }
        if let Some(processed_by) = changes.processed_by {
            order.processed_by = Some(processed_by);
        }
        if let Some(notes) = &changes.admin_notes {
            order.admin_notes = Some(notes.clone());
        }
        order.updated_at = Utc::now();
        for file in &changes.subtitle_files {
            subtitles.insert(file.id, file.clone());
        }

        Ok(order.clone())
    }

    async fn patch_order(
        &self,
        id: Uuid,
        patch: &OrderPatch,
        only_in: Option<OrderStatus>,
    ) -> Result<Order, RepositoryError> {
        let mut state = self.state()?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound("Order".into()))?;

        if let Some(required) = only_in {
            if order.status != required {
                return Err(RepositoryError::StatusMismatch {
                    actual: order.status,
                });
            }
        }

        if let Some(config) = &patch.subtitle_config {
            order.subtitle_config = config.clone();
        }
        if let Some(notes) = &patch.admin_notes {
            order.admin_notes = Some(notes.clone());
        }
        if let Some(session) = &patch.checkout_session_id {
            order.checkout_session_id = Some(session.clone());
        }
        if let Some(payment_status) = patch.payment_status {
            order.payment_status = payment_status;
        }
        order.updated_at = Utc::now();

        Ok(order.clone())
    }

    async fn order_stats(
        &self,
        since: Option<DateTime<Utc>>,
        user_id: Option<Uuid>,
    ) -> Result<OrderStats, RepositoryError> {
        let state = self.state()?;
        let mut stats = OrderStats::default();

        let selected = state.orders.values().filter(|o| {
            since.map_or(true, |t| o.created_at >= t) && user_id.map_or(true, |u| o.user_id == u)
        });
        for order in selected {
            stats.total_orders += 1;
            *stats
                .orders_by_status
                .entry(order.status.as_str().to_string())
                .or_insert(0) += 1;
            match order.payment_status {
                PaymentStatus::Paid => stats.revenue_cents += order.total_amount_cents,
                PaymentStatus::Refunded => stats.refunded_cents += order.total_amount_cents,
                _ => {}
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl SubtitleRepository for MemoryRepository {
    async fn list_subtitle_files(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<SubtitleFile>, RepositoryError> {
        let state = self.state()?;
        let mut files: Vec<SubtitleFile> = state
            .subtitles
            .values()
            .filter(|f| f.order_id == order_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(files)
    }

    async fn list_subtitle_files_for_orders(
        &self,
        order_ids: &[Uuid],
    ) -> Result<Vec<SubtitleFile>, RepositoryError> {
        let state = self.state()?;
        let mut files: Vec<SubtitleFile> = state
            .subtitles
            .values()
            .filter(|f| order_ids.contains(&f.order_id))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }

    async fn find_subtitle_file(&self, id: Uuid) -> Result<Option<SubtitleFile>, RepositoryError> {
        Ok(self.state()?.subtitles.get(&id).cloned())
    }

    async fn update_qa_status(
        &self,
        id: Uuid,
        status: QaStatus,
        notes: Option<String>,
    ) -> Result<SubtitleFile, RepositoryError> {
        let mut state = self.state()?;
        let file = state
            .subtitles
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound("Subtitle file".into()))?;
        file.qa_status = status;
        file.qa_notes = notes;
        Ok(file.clone())
    }
}

#[async_trait]
impl AuditLogRepository for MemoryRepository {
    async fn append_audit_log(&self, entry: &AdminActionLog) -> Result<(), RepositoryError> {
        if self.fail_audit_appends.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(anyhow::anyhow!(
                "audit log unavailable"
            )));
        }
        self.state()?.audit_log.push(entry.clone());
        Ok(())
    }

    async fn list_audit_logs(
        &self,
        filter: &AuditLogFilter,
    ) -> Result<Vec<AdminActionLog>, RepositoryError> {
        let state = self.state()?;
        let entries: Vec<AdminActionLog> = state
            .audit_log
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(paginate(entries, filter.skip, filter.limit))
    }
}

#[async_trait]
impl SettingsRepository for MemoryRepository {
    async fn seed_settings(&self, defaults: &[SystemSetting]) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        for setting in defaults {
            state
                .settings
                .entry(setting.key.clone())
                .or_insert_with(|| setting.clone());
        }
        Ok(())
    }

    async fn list_settings(&self) -> Result<Vec<SystemSetting>, RepositoryError> {
        Ok(self.state()?.settings.values().cloned().collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<SystemSetting>, RepositoryError> {
        Ok(self.state()?.settings.get(key).cloned())
    }

    async fn update_setting(
        &self,
        key: &str,
        value: &str,
        updated_by: Uuid,
    ) -> Result<SystemSetting, RepositoryError> {
        let mut state = self.state()?;
        let setting = state
            .settings
            .get_mut(key)
            .ok_or_else(|| RepositoryError::NotFound(format!("Setting '{}'", key)))?;
        setting.value = value.to_string();
        setting.updated_by = Some(updated_by);
        setting.updated_at = Utc::now();
        Ok(setting.clone())
    }
}

#[async_trait]
impl NotificationRepository for MemoryRepository {
    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<(), RepositoryError> {
        self.state()?.notifications.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let state = self.state()?;
        let items: Vec<Notification> = state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        Ok(paginate(items, 0, limit))
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Notification, RepositoryError> {
        let mut state = self.state()?;
        let notification = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
            .ok_or_else(|| RepositoryError::NotFound("Notification".into()))?;
        notification.is_read = true;
        Ok(notification.clone())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn health_check(&self) -> Result<(), RepositoryError> {
        self.state().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SubtitleConfig, VideoRef};

    fn order() -> Order {
        Order::new(
            Uuid::new_v4(),
            vec![VideoRef {
                id: Uuid::new_v4(),
                original_filename: "clip.mp4".into(),
                storage_key: "videos/clip.mp4".into(),
                duration_seconds: 60,
            }],
            SubtitleConfig::default(),
            100,
            "usd".into(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_transition_compare_and_set() {
        let repo = MemoryRepository::new();
        let order = order();
        repo.insert_order(&order).await.unwrap();

        let paid = repo
            .transition_order(
                order.id,
                OrderStatus::Created,
                OrderStatus::Paid,
                &OrderChanges {
                    payment_status: Some(PaymentStatus::Paid),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_status, PaymentStatus::Paid);

        let stale = repo
            .transition_order(
                order.id,
                OrderStatus::Created,
                OrderStatus::Paid,
                &OrderChanges::default(),
            )
            .await;
        assert!(matches!(
            stale,
            Err(RepositoryError::StatusMismatch {
                actual: OrderStatus::Paid
            })
        ));
    }

    #[tokio::test]
    async fn test_transition_with_files_is_all_or_nothing() {
        let repo = MemoryRepository::new();
        let order = order();
        repo.insert_order(&order).await.unwrap();
        let changes = OrderChanges {
            subtitle_files: vec![SubtitleFile::generated(
                order.id,
                None,
                Default::default(),
                "subtitles/a.srt".into(),
            )],
            ..Default::default()
        };

        repo.set_subtitle_failure(true);
        let failed = repo
            .transition_order(order.id, OrderStatus::Created, OrderStatus::Paid, &changes)
            .await;
        assert!(matches!(failed, Err(RepositoryError::Database(_))));
        assert_eq!(
            repo.find_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Created
        );
        assert!(repo.list_subtitle_files(order.id).await.unwrap().is_empty());

        repo.set_subtitle_failure(false);
        repo.transition_order(order.id, OrderStatus::Created, OrderStatus::Paid, &changes)
            .await
            .unwrap();
        assert_eq!(repo.list_subtitle_files(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let repo = MemoryRepository::new();
        repo.insert_user(&User::new("a@example.com", "h".into(), None, None))
            .await
            .unwrap();

        let result = repo
            .insert_user(&User::new("A@Example.com", "h".into(), None, None))
            .await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_seed_keeps_existing_values() {
        let repo = MemoryRepository::new();
        let mut setting = crate::models::SettingKey::PricePerMinuteCents.seed();
        repo.seed_settings(&[setting.clone()]).await.unwrap();
        repo.update_setting(&setting.key, "250", Uuid::new_v4())
            .await
            .unwrap();

        setting.value = "100".into();
        repo.seed_settings(&[setting.clone()]).await.unwrap();
        assert_eq!(
            repo.get_setting(&setting.key).await.unwrap().unwrap().value,
            "250"
        );
    }
}
