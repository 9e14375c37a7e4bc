//! Persistence traits.
//!
//! `PgRepository` backs production; `MemoryRepository` backs tests and
//! database-less local runs with the same semantics, including the
//! compare-and-set on order status.

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AdminActionLog, AuditLogFilter, Notification, Order, OrderChanges, OrderFilter, OrderStatus,
    PaymentStatus, QaStatus, SubtitleConfig, SubtitleFile, SystemSetting, User, UserFilter,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Compare-and-set lost: the row's status is not the expected one.
    #[error("order status is '{actual}'")]
    StatusMismatch { actual: OrderStatus },

    #[error(transparent)]
    Database(anyhow::Error),
}

/// Non-status order fields. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub subtitle_config: Option<SubtitleConfig>,
    pub admin_notes: Option<String>,
    pub checkout_session_id: Option<String>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderStats {
    pub total_orders: i64,
    pub orders_by_status: BTreeMap<String, i64>,
    /// Sum of orders whose payment is currently `paid`.
    pub revenue_cents: i64,
    pub refunded_cents: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UserCounts {
    pub total_users: i64,
    pub active_users: i64,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn insert_user(&self, user: &User) -> Result<(), RepositoryError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    /// Writes every mutable column of `user`.
    async fn update_user(&self, user: &User) -> Result<User, RepositoryError>;
    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, RepositoryError>;
    async fn count_users(&self) -> Result<UserCounts, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError>;
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, RepositoryError>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError>;

    /// Moves `id` from `expected` to `next` in one atomic step, together with
    /// `changes` and its subtitle files; nothing is written if any part fails.
    /// Returns `StatusMismatch` if the stored status is not `expected`.
    async fn transition_order(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
        changes: &OrderChanges,
    ) -> Result<Order, RepositoryError>;

    /// Applies `patch`, guarded on the current status when `only_in` is set.
    async fn patch_order(
        &self,
        id: Uuid,
        patch: &OrderPatch,
        only_in: Option<OrderStatus>,
    ) -> Result<Order, RepositoryError>;

    /// Aggregates orders created at or after `since`, optionally for one owner.
    async fn order_stats(
        &self,
        since: Option<DateTime<Utc>>,
        user_id: Option<Uuid>,
    ) -> Result<OrderStats, RepositoryError>;
}

#[async_trait]
pub trait SubtitleRepository: Send + Sync {
    async fn list_subtitle_files(&self, order_id: Uuid)
        -> Result<Vec<SubtitleFile>, RepositoryError>;
    /// Files of all listed orders, newest first.
    async fn list_subtitle_files_for_orders(
        &self,
        order_ids: &[Uuid],
    ) -> Result<Vec<SubtitleFile>, RepositoryError>;
    async fn find_subtitle_file(&self, id: Uuid) -> Result<Option<SubtitleFile>, RepositoryError>;
    async fn update_qa_status(
        &self,
        id: Uuid,
        status: QaStatus,
        notes: Option<String>,
    ) -> Result<SubtitleFile, RepositoryError>;
}

/// Append-only: entries are never updated or deleted.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append_audit_log(&self, entry: &AdminActionLog) -> Result<(), RepositoryError>;
    async fn list_audit_logs(
        &self,
        filter: &AuditLogFilter,
    ) -> Result<Vec<AdminActionLog>, RepositoryError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Inserts any missing setting; existing values are kept.
    async fn seed_settings(&self, defaults: &[SystemSetting]) -> Result<(), RepositoryError>;
    async fn list_settings(&self) -> Result<Vec<SystemSetting>, RepositoryError>;
    async fn get_setting(&self, key: &str) -> Result<Option<SystemSetting>, RepositoryError>;
    async fn update_setting(
        &self,
        key: &str,
        value: &str,
        updated_by: Uuid,
    ) -> Result<SystemSetting, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert_notification(&self, notification: &Notification)
        -> Result<(), RepositoryError>;
    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, RepositoryError>;
    async fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Notification, RepositoryError>;
}

/// Everything the service layer persists.
#[async_trait]
pub trait Repository:
    UserRepository
    + OrderRepository
    + SubtitleRepository
    + AuditLogRepository
    + SettingsRepository
    + NotificationRepository
{
    async fn health_check(&self) -> Result<(), RepositoryError>;
}

/// Clamp caller-supplied pagination.
pub(crate) fn page(skip: i64, limit: i64) -> (i64, i64) {
    (skip.max(0), limit.clamp(1, 500))
}
