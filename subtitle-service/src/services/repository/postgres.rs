use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use sqlx::types::Json;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    page, AuditLogRepository, NotificationRepository, OrderPatch, OrderRepository, OrderStats,
    Repository, RepositoryError, SettingsRepository, SubtitleRepository, UserCounts,
    UserRepository,
};
use crate::config::DatabaseConfig;
use crate::models::{
    AdminActionLog, AuditLogFilter, Notification, Order, OrderChanges, OrderFilter, OrderStatus,
    PaymentStatus, QaStatus, SubtitleFile, SystemSetting, User, UserFilter,
};
use crate::services::metrics::db_timer;

const ORDER_COLUMNS: &str = "id, user_id, videos, subtitle_config, status, payment_status, \
     total_duration_seconds, total_amount_cents, currency, payment_reference, \
     checkout_session_id, admin_notes, processed_by, created_at, updated_at";

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, role, is_active, created_at, updated_at";

const SUBTITLE_COLUMNS: &str =
    "id, order_id, video_id, format, qa_status, qa_notes, download_location, created_at";

const AUDIT_COLUMNS: &str = "id, actor_id, actor_role, action, target_type, target_id, \
     outcome, notes, details, created_at";

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

fn db_error(context: &str, e: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(anyhow::anyhow!("{}: {}", context, e))
}

fn unique_or_db_error(context: &str, conflict: &str, e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            RepositoryError::Conflict(conflict.to_string())
        }
        _ => db_error(context, e),
    }
}

async fn insert_subtitle_rows(
    tx: &mut Transaction<'_, Postgres>,
    files: &[SubtitleFile],
) -> Result<(), RepositoryError> {
    for file in files {
        sqlx::query(
            r#"
            INSERT INTO subtitle_files (id, order_id, video_id, format, qa_status, qa_notes, download_location, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(file.id)
        .bind(file.order_id)
        .bind(file.video_id)
        .bind(file.format.as_str())
        .bind(file.qa_status.as_str())
        .bind(&file.qa_notes)
        .bind(&file.download_location)
        .bind(file.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("Failed to store subtitle file", e))?;
    }
    Ok(())
}

impl PgRepository {
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| db_error("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), RepositoryError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn current_status(&self, id: Uuid) -> Result<OrderStatus, RepositoryError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to read order status", e))?;

        match status {
            Some(s) => s
                .parse()
                .map_err(|e| RepositoryError::Database(anyhow::anyhow!("{}", e))),
            None => Err(RepositoryError::NotFound("Order".into())),
        }
    }
}

#[async_trait]
impl UserRepository for PgRepository {
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn insert_user(&self, user: &User) -> Result<(), RepositoryError> {
        let _timer = db_timer("insert_user");

        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_or_db_error("Failed to create user", "Email already registered", e))?;

        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let _timer = db_timer("find_user_by_id");

        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get user", e))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let _timer = db_timer("find_user_by_email");

        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get user", e))
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn update_user(&self, user: &User) -> Result<User, RepositoryError> {
        let _timer = db_timer("update_user");

        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, first_name = $4, last_name = $5,
                role = $6, is_active = $7, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unique_or_db_error("Failed to update user", "Email already registered", e))?
        .ok_or_else(|| RepositoryError::NotFound("User".into()))
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, RepositoryError> {
        let _timer = db_timer("list_users");
        let (skip, limit) = page(filter.skip, filter.limit);

        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {}
            FROM users
            WHERE ($1::text IS NULL OR role = $1)
              AND ($2::bool IS NULL OR is_active = $2)
            ORDER BY created_at DESC
            OFFSET $3 LIMIT $4
            "#,
            USER_COLUMNS
        ))
        .bind(filter.role.map(|r| r.as_str()))
        .bind(filter.is_active)
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list users", e))
    }

    async fn count_users(&self) -> Result<UserCounts, RepositoryError> {
        let _timer = db_timer("count_users");

        let (total_users, active_users): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*)::BIGINT, COUNT(*) FILTER (WHERE is_active)::BIGINT FROM users",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to count users", e))?;

        Ok(UserCounts {
            total_users,
            active_users,
        })
    }
}

#[async_trait]
impl OrderRepository for PgRepository {
    #[instrument(skip(self, order), fields(order_id = %order.id, user_id = %order.user_id))]
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        let _timer = db_timer("insert_order");

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, videos, subtitle_config, status, payment_status,
                                total_duration_seconds, total_amount_cents, currency,
                                payment_reference, checkout_session_id, admin_notes, processed_by,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(Json(&order.videos))
        .bind(Json(&order.subtitle_config))
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.total_duration_seconds)
        .bind(order.total_amount_cents)
        .bind(&order.currency)
        .bind(&order.payment_reference)
        .bind(&order.checkout_session_id)
        .bind(&order.admin_notes)
        .bind(order.processed_by)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create order", e))?;

        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        let _timer = db_timer("find_order");

        sqlx::query_as::<_, Order>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get order", e))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let _timer = db_timer("list_orders");
        let (skip, limit) = page(filter.skip, filter.limit);

        sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {}
            FROM orders
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR payment_status = $3)
            ORDER BY created_at DESC
            OFFSET $4 LIMIT $5
            "#,
            ORDER_COLUMNS
        ))
        .bind(filter.user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.payment_status.map(|s| s.as_str()))
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list orders", e))
    }

    #[instrument(skip(self, changes), fields(order_id = %id, from = %expected, to = %next))]
    async fn transition_order(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
        changes: &OrderChanges,
    ) -> Result<Order, RepositoryError> {
        let _timer = db_timer("transition_order");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let updated = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET status = $3,
                payment_status = COALESCE($4, payment_status),
                payment_reference = COALESCE($5, payment_reference),
                processed_by = COALESCE($6, processed_by),
                admin_notes = COALESCE($7, admin_notes),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(changes.payment_status.map(|s| s.as_str()))
        .bind(&changes.payment_reference)
        .bind(changes.processed_by)
        .bind(&changes.admin_notes)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to transition order", e))?;

        let Some(order) = updated else {
            drop(tx);
            return Err(RepositoryError::StatusMismatch {
                actual: self.current_status(id).await?,
            });
        };

        insert_subtitle_rows(&mut tx, &changes.subtitle_files).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit order transition", e))?;
        Ok(order)
    }

    #[instrument(skip(self, patch), fields(order_id = %id))]
    async fn patch_order(
        &self,
        id: Uuid,
        patch: &OrderPatch,
        only_in: Option<OrderStatus>,
    ) -> Result<Order, RepositoryError> {
        let _timer = db_timer("patch_order");

        let updated = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET subtitle_config = COALESCE($3, subtitle_config),
                admin_notes = COALESCE($4, admin_notes),
                checkout_session_id = COALESCE($5, checkout_session_id),
                payment_status = COALESCE($6, payment_status),
                updated_at = NOW()
            WHERE id = $1 AND ($2::text IS NULL OR status = $2)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(only_in.map(|s| s.as_str()))
        .bind(patch.subtitle_config.as_ref().map(Json))
        .bind(&patch.admin_notes)
        .bind(&patch.checkout_session_id)
        .bind(patch.payment_status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update order", e))?;

        match updated {
            Some(order) => Ok(order),
            None => Err(RepositoryError::StatusMismatch {
                actual: self.current_status(id).await?,
            }),
        }
    }

    async fn order_stats(
        &self,
        since: Option<DateTime<Utc>>,
        user_id: Option<Uuid>,
    ) -> Result<OrderStats, RepositoryError> {
        let _timer = db_timer("order_stats");

        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT status, payment_status, COUNT(*)::BIGINT, COALESCE(SUM(total_amount_cents), 0)::BIGINT
            FROM orders
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::uuid IS NULL OR user_id = $2)
            GROUP BY status, payment_status
            "#,
        )
        .bind(since)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to compute order stats", e))?;

        let mut stats = OrderStats::default();
        for (status, payment_status, count, amount) in rows {
            stats.total_orders += count;
            *stats.orders_by_status.entry(status).or_insert(0) += count;
            match payment_status.parse::<PaymentStatus>() {
                Ok(PaymentStatus::Paid) => stats.revenue_cents += amount,
                Ok(PaymentStatus::Refunded) => stats.refunded_cents += amount,
                _ => {}
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl SubtitleRepository for PgRepository {
    async fn list_subtitle_files(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<SubtitleFile>, RepositoryError> {
        let _timer = db_timer("list_subtitle_files");

        sqlx::query_as::<_, SubtitleFile>(&format!(
            "SELECT {} FROM subtitle_files WHERE order_id = $1 ORDER BY created_at",
            SUBTITLE_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list subtitle files", e))
    }

    async fn list_subtitle_files_for_orders(
        &self,
        order_ids: &[Uuid],
    ) -> Result<Vec<SubtitleFile>, RepositoryError> {
        let _timer = db_timer("list_subtitle_files_for_orders");

        sqlx::query_as::<_, SubtitleFile>(&format!(
            "SELECT {} FROM subtitle_files WHERE order_id = ANY($1) ORDER BY created_at DESC",
            SUBTITLE_COLUMNS
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list subtitle files", e))
    }

    async fn find_subtitle_file(&self, id: Uuid) -> Result<Option<SubtitleFile>, RepositoryError> {
        sqlx::query_as::<_, SubtitleFile>(&format!(
            "SELECT {} FROM subtitle_files WHERE id = $1",
            SUBTITLE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get subtitle file", e))
    }

    async fn update_qa_status(
        &self,
        id: Uuid,
        status: QaStatus,
        notes: Option<String>,
    ) -> Result<SubtitleFile, RepositoryError> {
        let _timer = db_timer("update_qa_status");

        sqlx::query_as::<_, SubtitleFile>(&format!(
            "UPDATE subtitle_files SET qa_status = $2, qa_notes = $3 WHERE id = $1 RETURNING {}",
            SUBTITLE_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update subtitle file", e))?
        .ok_or_else(|| RepositoryError::NotFound("Subtitle file".into()))
    }
}

#[async_trait]
impl AuditLogRepository for PgRepository {
    #[instrument(skip(self, entry), fields(action = %entry.action.as_str(), outcome = %entry.outcome.as_str()))]
    async fn append_audit_log(&self, entry: &AdminActionLog) -> Result<(), RepositoryError> {
        let _timer = db_timer("append_audit_log");

        sqlx::query(
            r#"
            INSERT INTO admin_action_logs (id, actor_id, actor_role, action, target_type, target_id, outcome, notes, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(entry.actor_role.as_str())
        .bind(entry.action.as_str())
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(entry.outcome.as_str())
        .bind(&entry.notes)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to append audit log", e))?;

        Ok(())
    }

    async fn list_audit_logs(
        &self,
        filter: &AuditLogFilter,
    ) -> Result<Vec<AdminActionLog>, RepositoryError> {
        let _timer = db_timer("list_audit_logs");
        let (skip, limit) = page(filter.skip, filter.limit);

        sqlx::query_as::<_, AdminActionLog>(&format!(
            r#"
            SELECT {}
            FROM admin_action_logs
            WHERE ($1::uuid IS NULL OR actor_id = $1)
              AND ($2::text IS NULL OR action = $2)
              AND ($3::text IS NULL OR target_type = $3)
              AND ($4::text IS NULL OR target_id = $4)
              AND ($5::text IS NULL OR outcome = $5)
              AND ($6::timestamptz IS NULL OR created_at >= $6)
              AND ($7::timestamptz IS NULL OR created_at <= $7)
            ORDER BY created_at DESC
            OFFSET $8 LIMIT $9
            "#,
            AUDIT_COLUMNS
        ))
        .bind(filter.actor_id)
        .bind(filter.action.map(|a| a.as_str()))
        .bind(&filter.target_type)
        .bind(&filter.target_id)
        .bind(filter.outcome.map(|o| o.as_str()))
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list audit logs", e))
    }
}

#[async_trait]
impl SettingsRepository for PgRepository {
    async fn seed_settings(&self, defaults: &[SystemSetting]) -> Result<(), RepositoryError> {
        for setting in defaults {
            sqlx::query(
                r#"
                INSERT INTO system_settings (key, value, description, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (key) DO NOTHING
                "#,
            )
            .bind(&setting.key)
            .bind(&setting.value)
            .bind(&setting.description)
            .bind(setting.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to seed settings", e))?;
        }
        Ok(())
    }

    async fn list_settings(&self) -> Result<Vec<SystemSetting>, RepositoryError> {
        sqlx::query_as::<_, SystemSetting>(
            "SELECT key, value, description, updated_at, updated_by FROM system_settings ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list settings", e))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<SystemSetting>, RepositoryError> {
        let _timer = db_timer("get_setting");

        sqlx::query_as::<_, SystemSetting>(
            "SELECT key, value, description, updated_at, updated_by FROM system_settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get setting", e))
    }

    async fn update_setting(
        &self,
        key: &str,
        value: &str,
        updated_by: Uuid,
    ) -> Result<SystemSetting, RepositoryError> {
        sqlx::query_as::<_, SystemSetting>(
            r#"
            UPDATE system_settings
            SET value = $2, updated_by = $3, updated_at = NOW()
            WHERE key = $1
            RETURNING key, value, description, updated_at, updated_by
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(updated_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update setting", e))?
        .ok_or_else(|| RepositoryError::NotFound(format!("Setting '{}'", key)))
    }
}

#[async_trait]
impl NotificationRepository for PgRepository {
    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, order_id, message, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.order_id)
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create notification", e))?;

        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let (_, limit) = page(0, limit);

        sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, order_id, message, is_read, created_at
            FROM notifications
            WHERE user_id = $1 AND ($2::bool = FALSE OR is_read = FALSE)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list notifications", e))
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Notification, RepositoryError> {
        sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications SET is_read = TRUE
            WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, order_id, message, is_read, created_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update notification", e))?
        .ok_or_else(|| RepositoryError::NotFound("Notification".into()))
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }
}
