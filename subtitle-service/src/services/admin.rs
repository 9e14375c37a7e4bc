//! Privileged operations.
//!
//! Every mutation goes through `AdminService::execute`, which authorizes,
//! applies and audits the command. Exactly one audit entry is appended per
//! call, whether the command succeeded, was rejected or failed downstream.

use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::dtos::admin::{AdminActionResponse, AdminCommandResult, AdminStats, UpdateUserRequest};
use crate::dtos::orders::OrderDetail;
use crate::models::{
    AdminAction, AdminActionLog, AuditLogFilter, AuditOutcome, Order, OrderChanges, OrderEvent,
    OrderFilter, PaymentStatus, QaStatus, Role, SettingKey, SubtitleFile, SystemSetting, User,
    UserFilter,
};
use crate::services::audit::{AuditEntry, AuditLogger, AuditReceipt};
use crate::services::authorization::{authorize, Action, AuthorizationError};
use crate::services::error::ServiceError;
use crate::services::jwt::Principal;
use crate::services::metrics;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentProvider;
use crate::services::repository::{OrderPatch, Repository};
use crate::workers::{JobQueue, JobTrigger, TranscriptionJob};

#[derive(Debug, Clone)]
pub enum AdminCommand {
    ChangeRole {
        user_id: Uuid,
        role: Role,
    },
    UpdateUser {
        user_id: Uuid,
        changes: UpdateUserRequest,
    },
    UpdateSetting {
        key: String,
        value: String,
    },
    UpdateOrder {
        order_id: Uuid,
        admin_notes: String,
    },
    Reprocess {
        order_id: Uuid,
        notes: Option<String>,
    },
    Refund {
        order_id: Uuid,
        reason: Option<String>,
    },
    SetQaStatus {
        subtitle_id: Uuid,
        status: QaStatus,
        notes: Option<String>,
    },
}

impl AdminCommand {
    fn audit_entry(&self) -> AuditEntry {
        match self {
            AdminCommand::ChangeRole { user_id, role } => AuditEntry {
                action: AdminAction::ChangeRole,
                target_type: "user",
                target_id: user_id.to_string(),
                notes: None,
                details: Some(json!({ "new_role": role })),
            },
            AdminCommand::UpdateUser { user_id, changes } => AuditEntry {
                action: AdminAction::UpdateUser,
                target_type: "user",
                target_id: user_id.to_string(),
                notes: None,
                details: Some(json!({
                    "first_name": changes.first_name,
                    "last_name": changes.last_name,
                    "is_active": changes.is_active,
                })),
            },
            AdminCommand::UpdateSetting { key, value } => AuditEntry {
                action: AdminAction::UpdateSetting,
                target_type: "setting",
                target_id: key.clone(),
                notes: None,
                details: Some(json!({ "value": value })),
            },
            AdminCommand::UpdateOrder {
                order_id,
                admin_notes,
            } => AuditEntry {
                action: AdminAction::UpdateOrder,
                target_type: "order",
                target_id: order_id.to_string(),
                notes: Some(admin_notes.clone()),
                details: None,
            },
            AdminCommand::Reprocess { order_id, notes } => AuditEntry {
                action: AdminAction::ReprocessOrder,
                target_type: "order",
                target_id: order_id.to_string(),
                notes: notes.clone(),
                details: None,
            },
            AdminCommand::Refund { order_id, reason } => AuditEntry {
                action: AdminAction::RefundOrder,
                target_type: "order",
                target_id: order_id.to_string(),
                notes: reason.clone(),
                details: None,
            },
            AdminCommand::SetQaStatus {
                subtitle_id,
                status,
                notes,
            } => AuditEntry {
                action: AdminAction::UpdateQaStatus,
                target_type: "subtitle_file",
                target_id: subtitle_id.to_string(),
                notes: notes.clone(),
                details: Some(json!({ "qa_status": status })),
            },
        }
    }
}

/// A command that did not succeed, together with the receipt of the audit
/// entry describing it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct AdminCommandError {
    pub error: ServiceError,
    pub audit: AuditReceipt,
}

/// An admin request whose body never became a command.
#[derive(Debug)]
pub struct MalformedCommand {
    pub action: AdminAction,
    pub target_type: &'static str,
    pub target_id: String,
    pub error: ServiceError,
}

/// Permission gate for an admin action before its body is known.
fn required_action(action: AdminAction) -> Action {
    match action {
        AdminAction::ChangeRole => Action::ChangeRole,
        AdminAction::UpdateUser => Action::UpdateUser,
        AdminAction::UpdateSetting => Action::UpdateSetting,
        AdminAction::UpdateOrder => Action::UpdateOrder,
        AdminAction::ReprocessOrder => Action::ReprocessOrder,
        AdminAction::RefundOrder => Action::RefundOrder,
        AdminAction::UpdateQaStatus => Action::ReviewSubtitles,
    }
}

/// Orders with a provider refund in flight on this instance.
#[derive(Clone, Default)]
struct RefundClaims(Arc<Mutex<HashSet<Uuid>>>);

impl RefundClaims {
    fn claim(&self, order_id: Uuid) -> Option<RefundClaim> {
        let mut held = self.0.lock().unwrap_or_else(|e| e.into_inner());
        held.insert(order_id).then(|| RefundClaim {
            claims: self.clone(),
            order_id,
        })
    }
}

struct RefundClaim {
    claims: RefundClaims,
    order_id: Uuid,
}

impl Drop for RefundClaim {
    fn drop(&mut self) {
        let mut held = self.claims.0.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.order_id);
    }
}

/// Key under which the provider deduplicates refunds of one order.
fn refund_idempotency_key(order_id: Uuid) -> String {
    format!("refund-{}", order_id)
}

/// Rejected means nothing was attempted; failed means a downstream step broke.
fn outcome_for(err: &ServiceError) -> AuditOutcome {
    match err {
        ServiceError::Authentication(_)
        | ServiceError::Authorization(_)
        | ServiceError::InvalidTransition(_)
        | ServiceError::Validation(_)
        | ServiceError::InvalidInput(_)
        | ServiceError::NotFound(_)
        | ServiceError::Conflict(_) => AuditOutcome::Rejected,
        ServiceError::ExternalService(_) | ServiceError::Storage(_) | ServiceError::Internal(_) => {
            AuditOutcome::Failed
        }
    }
}

#[derive(Clone)]
pub struct AdminService {
    repo: Arc<dyn Repository>,
    orders: OrderService,
    payments: Arc<dyn PaymentProvider>,
    jobs: JobQueue,
    audit: AuditLogger,
    refunds: RefundClaims,
}

impl AdminService {
    pub fn new(
        repo: Arc<dyn Repository>,
        orders: OrderService,
        payments: Arc<dyn PaymentProvider>,
        jobs: JobQueue,
        audit: AuditLogger,
    ) -> Self {
        Self {
            repo,
            orders,
            payments,
            jobs,
            audit,
            refunds: RefundClaims::default(),
        }
    }

    #[tracing::instrument(skip(self, actor, command), fields(actor_id = %actor.user_id))]
    pub async fn execute(
        &self,
        actor: &Principal,
        command: AdminCommand,
    ) -> Result<AdminActionResponse, AdminCommandError> {
        let entry = command.audit_entry();
        let result = self.dispatch(actor, command).await;
        let audit = self.record_attempt(actor, entry, result.as_ref().err()).await;

        match result {
            Ok(result) => Ok(AdminActionResponse { result, audit }),
            Err(error) => Err(AdminCommandError { error, audit }),
        }
    }

    /// Audits an admin request whose body could not be parsed or validated.
    /// Callers without the permission see the authorization error, not the
    /// body error.
    #[tracing::instrument(skip(self, actor, malformed), fields(actor_id = %actor.user_id))]
    pub async fn reject_malformed(
        &self,
        actor: &Principal,
        malformed: MalformedCommand,
    ) -> AdminCommandError {
        let error = match authorize(actor.role, required_action(malformed.action)) {
            Err(denied) => denied.into(),
            Ok(()) => malformed.error,
        };
        let entry = AuditEntry {
            action: malformed.action,
            target_type: malformed.target_type,
            target_id: malformed.target_id,
            notes: None,
            details: None,
        };

        let audit = self.record_attempt(actor, entry, Some(&error)).await;
        AdminCommandError { error, audit }
    }

    async fn dispatch(
        &self,
        actor: &Principal,
        command: AdminCommand,
    ) -> Result<AdminCommandResult, ServiceError> {
        match command {
            AdminCommand::ChangeRole { user_id, role } => self
                .change_role(actor, user_id, role)
                .await
                .map(AdminCommandResult::User),
            AdminCommand::UpdateUser { user_id, changes } => self
                .update_user(actor, user_id, changes)
                .await
                .map(AdminCommandResult::User),
            AdminCommand::UpdateSetting { key, value } => self
                .update_setting(actor, &key, &value)
                .await
                .map(AdminCommandResult::Setting),
            AdminCommand::UpdateOrder {
                order_id,
                admin_notes,
            } => self
                .update_order(actor, order_id, admin_notes)
                .await
                .map(AdminCommandResult::Order),
            AdminCommand::Reprocess { order_id, notes } => self
                .reprocess(actor, order_id, notes)
                .await
                .map(AdminCommandResult::Order),
            AdminCommand::Refund { order_id, reason } => self
                .refund(actor, order_id, reason)
                .await
                .map(AdminCommandResult::Order),
            AdminCommand::SetQaStatus {
                subtitle_id,
                status,
                notes,
            } => self
                .set_qa_status(actor, subtitle_id, status, notes)
                .await
                .map(AdminCommandResult::Subtitle),
        }
    }

    /// Appends the one audit entry for an attempt; `error` is `None` on success.
    async fn record_attempt(
        &self,
        actor: &Principal,
        mut entry: AuditEntry,
        error: Option<&ServiceError>,
    ) -> AuditReceipt {
        let action = entry.action;
        let outcome = match error {
            None => AuditOutcome::Succeeded,
            Some(e) => {
                let mut details = entry.details.take().unwrap_or_else(|| json!({}));
                details["error"] = json!(e.to_string());
                entry.details = Some(details);
                outcome_for(e)
            }
        };

        let receipt = self.audit.record(actor, entry, outcome).await;
        metrics::record_admin_action(action.as_str(), outcome.as_str());
        receipt
    }

    async fn change_role(
        &self,
        actor: &Principal,
        user_id: Uuid,
        role: Role,
    ) -> Result<User, ServiceError> {
        authorize(actor.role, Action::ChangeRole)?;
        if user_id == actor.user_id {
            return Err(AuthorizationError::Denied("Cannot change your own role".into()).into());
        }

        let mut user = self.find_user(user_id).await?;
        let previous = user.role;
        user.role = role;
        let user = self.repo.update_user(&user).await?;

        tracing::info!(user_id = %user_id, from = %previous, to = %role, "Role changed");
        Ok(user)
    }

    async fn update_user(
        &self,
        actor: &Principal,
        user_id: Uuid,
        changes: UpdateUserRequest,
    ) -> Result<User, ServiceError> {
        authorize(actor.role, Action::UpdateUser)?;

        let mut user = self.find_user(user_id).await?;
        if user.role.is_privileged() {
            authorize(actor.role, Action::UpdatePrivilegedUser)?;
        }
        if user_id == actor.user_id && changes.is_active == Some(false) {
            return Err(AuthorizationError::Denied("Cannot deactivate your own account".into()).into());
        }

        if let Some(first_name) = changes.first_name {
            user.first_name = Some(first_name);
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = Some(last_name);
        }
        if let Some(is_active) = changes.is_active {
            user.is_active = is_active;
        }

        Ok(self.repo.update_user(&user).await?)
    }

    async fn update_setting(
        &self,
        actor: &Principal,
        key: &str,
        value: &str,
    ) -> Result<SystemSetting, ServiceError> {
        authorize(actor.role, Action::UpdateSetting)?;

        let setting = SettingKey::from_key(key)
            .ok_or_else(|| ServiceError::NotFound(format!("Setting '{}'", key)))?;
        let parsed = setting.parse_value(value).map_err(ServiceError::Validation)?;

        Ok(self
            .repo
            .update_setting(setting.as_str(), &parsed.to_string(), actor.user_id)
            .await?)
    }

    async fn update_order(
        &self,
        actor: &Principal,
        order_id: Uuid,
        admin_notes: String,
    ) -> Result<Order, ServiceError> {
        authorize(actor.role, Action::UpdateOrder)?;
        let patch = OrderPatch {
            admin_notes: Some(admin_notes),
            ..Default::default()
        };
        self.orders.patch(order_id, &patch, None).await
    }

    /// Moves a failed order back to processing and queues a fresh job.
    async fn reprocess(
        &self,
        actor: &Principal,
        order_id: Uuid,
        notes: Option<String>,
    ) -> Result<Order, ServiceError> {
        authorize(actor.role, Action::ReprocessOrder)?;

        let changes = OrderChanges {
            processed_by: Some(actor.user_id),
            admin_notes: notes,
            ..Default::default()
        };
        let order = self
            .orders
            .apply_event(order_id, OrderEvent::Reprocess, changes)
            .await?;

        let job = TranscriptionJob {
            order_id,
            trigger: JobTrigger::AdminReprocess,
        };
        if let Err(e) = self.jobs.submit(job) {
            tracing::error!(order_id = %order_id, error = %e, "Failed to queue reprocessing job");
            if let Err(revert) = self
                .orders
                .apply_event(order_id, OrderEvent::JobFailed, OrderChanges::default())
                .await
            {
                tracing::error!(order_id = %order_id, error = %revert, "Failed to mark unqueued order as failed");
            }
            return Err(ServiceError::ExternalService(format!(
                "Transcription queue unavailable: {}",
                e
            )));
        }

        Ok(order)
    }

    /// Refunds through the provider first; the order only becomes `refunded`
    /// once the provider has accepted the refund. A claim on the order keeps
    /// a second refund from reaching the provider while one is in flight, and
    /// the idempotency key covers requests landing on other instances.
    async fn refund(
        &self,
        actor: &Principal,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<Order, ServiceError> {
        authorize(actor.role, Action::RefundOrder)?;

        let _claim = self.refunds.claim(order_id).ok_or_else(|| {
            ServiceError::Conflict("A refund for this order is already in progress".into())
        })?;

        let order = self.orders.find(order_id).await?;
        order.status.apply(OrderEvent::Refund)?;

        let payment_reference = order.payment_reference.as_deref().ok_or_else(|| {
            ServiceError::Validation("Order has no payment reference to refund".into())
        })?;

        let receipt = self
            .payments
            .refund(
                payment_reference,
                order.total_amount_cents,
                reason.as_deref(),
                &refund_idempotency_key(order_id),
            )
            .await?;

        tracing::info!(
            order_id = %order_id,
            refund_id = %receipt.id,
            amount_cents = order.total_amount_cents,
            "Provider refund issued"
        );

        let changes = OrderChanges {
            payment_status: Some(PaymentStatus::Refunded),
            processed_by: Some(actor.user_id),
            admin_notes: reason,
            ..Default::default()
        };
        self.orders
            .apply_event(order_id, OrderEvent::Refund, changes)
            .await
            .map_err(|e| {
                tracing::error!(
                    order_id = %order_id,
                    refund_id = %receipt.id,
                    error = %e,
                    "Refund issued but order not updated"
                );
                e
            })
    }

    async fn set_qa_status(
        &self,
        actor: &Principal,
        subtitle_id: Uuid,
        status: QaStatus,
        notes: Option<String>,
    ) -> Result<SubtitleFile, ServiceError> {
        authorize(actor.role, Action::ReviewSubtitles)?;
        Ok(self.repo.update_qa_status(subtitle_id, status, notes).await?)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.repo
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".into()))
    }

    pub async fn list_users(
        &self,
        actor: &Principal,
        filter: &UserFilter,
    ) -> Result<Vec<User>, ServiceError> {
        authorize(actor.role, Action::ViewUsers)?;
        Ok(self.repo.list_users(filter).await?)
    }

    pub async fn get_user(&self, actor: &Principal, user_id: Uuid) -> Result<User, ServiceError> {
        authorize(actor.role, Action::ViewUsers)?;
        self.find_user(user_id).await
    }

    pub async fn list_orders(
        &self,
        actor: &Principal,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, ServiceError> {
        authorize(actor.role, Action::ViewAllOrders)?;
        self.orders.list(filter).await
    }

    pub async fn get_order(
        &self,
        actor: &Principal,
        order_id: Uuid,
    ) -> Result<OrderDetail, ServiceError> {
        authorize(actor.role, Action::ViewAllOrders)?;
        self.orders.detail(order_id).await
    }

    pub async fn list_logs(
        &self,
        actor: &Principal,
        filter: &AuditLogFilter,
    ) -> Result<Vec<AdminActionLog>, ServiceError> {
        authorize(actor.role, Action::ViewAuditLog)?;
        Ok(self.repo.list_audit_logs(filter).await?)
    }

    pub async fn stats(&self, actor: &Principal, days_back: i64) -> Result<AdminStats, ServiceError> {
        authorize(actor.role, Action::ViewStats)?;
        if !(1..=3650).contains(&days_back) {
            return Err(ServiceError::Validation(
                "days_back must be between 1 and 3650".into(),
            ));
        }

        let since = Utc::now() - Duration::days(days_back);
        let orders = self.repo.order_stats(Some(since), None).await?;
        let users = self.repo.count_users().await?;

        Ok(AdminStats {
            days_back,
            orders,
            users,
        })
    }

    pub async fn list_settings(&self, actor: &Principal) -> Result<Vec<SystemSetting>, ServiceError> {
        authorize(actor.role, Action::ViewSettings)?;
        Ok(self.repo.list_settings().await?)
    }
}
