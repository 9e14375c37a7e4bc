//! Admin action log: one immutable row per privileged mutation attempt.

use super::{Role, UnknownVariant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    ChangeRole,
    UpdateUser,
    UpdateSetting,
    UpdateOrder,
    ReprocessOrder,
    RefundOrder,
    UpdateQaStatus,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::ChangeRole => "change_role",
            AdminAction::UpdateUser => "update_user",
            AdminAction::UpdateSetting => "update_setting",
            AdminAction::UpdateOrder => "update_order",
            AdminAction::ReprocessOrder => "reprocess_order",
            AdminAction::RefundOrder => "refund_order",
            AdminAction::UpdateQaStatus => "update_qa_status",
        }
    }
}

impl FromStr for AdminAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "change_role" => Ok(AdminAction::ChangeRole),
            "update_user" => Ok(AdminAction::UpdateUser),
            "update_setting" => Ok(AdminAction::UpdateSetting),
            "update_order" => Ok(AdminAction::UpdateOrder),
            "reprocess_order" => Ok(AdminAction::ReprocessOrder),
            "refund_order" => Ok(AdminAction::RefundOrder),
            "update_qa_status" => Ok(AdminAction::UpdateQaStatus),
            other => Err(UnknownVariant::new("admin action", other)),
        }
    }
}

impl TryFrom<String> for AdminAction {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded,
    /// Refused before any mutation: missing permission or a business rule.
    Rejected,
    /// Allowed, but a downstream step errored.
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Succeeded => "succeeded",
            AuditOutcome::Rejected => "rejected",
            AuditOutcome::Failed => "failed",
        }
    }
}

impl FromStr for AuditOutcome {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(AuditOutcome::Succeeded),
            "rejected" => Ok(AuditOutcome::Rejected),
            "failed" => Ok(AuditOutcome::Failed),
            other => Err(UnknownVariant::new("audit outcome", other)),
        }
    }
}

impl TryFrom<String> for AuditOutcome {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdminActionLog {
    pub id: Uuid,
    pub actor_id: Uuid,
    #[sqlx(try_from = "String")]
    pub actor_role: Role,
    #[sqlx(try_from = "String")]
    pub action: AdminAction,
    pub target_type: String,
    pub target_id: String,
    #[sqlx(try_from = "String")]
    pub outcome: AuditOutcome,
    pub notes: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<AdminAction>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

impl AuditLogFilter {
    pub fn matches(&self, entry: &AdminActionLog) -> bool {
        self.actor_id.map_or(true, |id| entry.actor_id == id)
            && self.action.map_or(true, |a| entry.action == a)
            && self
                .target_type
                .as_deref()
                .map_or(true, |t| entry.target_type == t)
            && self
                .target_id
                .as_deref()
                .map_or(true, |t| entry.target_id == t)
            && self.outcome.map_or(true, |o| entry.outcome == o)
            && self.start_date.map_or(true, |d| entry.created_at >= d)
            && self.end_date.map_or(true, |d| entry.created_at <= d)
    }
}
