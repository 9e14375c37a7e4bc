//! Admin action logger.
//!
//! Every privileged mutation attempt produces exactly one append, whatever its
//! outcome. A failed append never undoes the mutation it describes; the
//! caller gets an `AuditReceipt` saying so.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{AdminAction, AdminActionLog, AuditOutcome};
use crate::services::jwt::Principal;
use crate::services::repository::Repository;

/// What was attempted, against which target.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AdminAction,
    pub target_type: &'static str,
    pub target_id: String,
    pub notes: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReceipt {
    pub logged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AuditLogger {
    repo: Arc<dyn Repository>,
}

impl AuditLogger {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        actor: &Principal,
        entry: AuditEntry,
        outcome: AuditOutcome,
    ) -> AuditReceipt {
        let log = AdminActionLog {
            id: Uuid::new_v4(),
            actor_id: actor.user_id,
            actor_role: actor.role,
            action: entry.action,
            target_type: entry.target_type.to_string(),
            target_id: entry.target_id,
            outcome,
            notes: entry.notes,
            details: entry.details,
            created_at: Utc::now(),
        };

        match self.repo.append_audit_log(&log).await {
            Ok(()) => {
                tracing::info!(
                    log_id = %log.id,
                    actor_id = %log.actor_id,
                    action = log.action.as_str(),
                    target_type = %log.target_type,
                    target_id = %log.target_id,
                    outcome = outcome.as_str(),
                    "Admin action recorded"
                );
                AuditReceipt {
                    logged: true,
                    log_id: Some(log.id),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(
                    actor_id = %log.actor_id,
                    action = log.action.as_str(),
                    target_type = %log.target_type,
                    target_id = %log.target_id,
                    outcome = outcome.as_str(),
                    error = %e,
                    "Failed to record admin action"
                );
                AuditReceipt {
                    logged: false,
                    log_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditLogFilter, Role};
    use crate::services::repository::{AuditLogRepository, MemoryRepository};

    fn actor() -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "root@example.com".into(),
            role: Role::SuperAdmin,
            token_id: "jti".into(),
        }
    }

    fn entry() -> AuditEntry {
        AuditEntry {
            action: AdminAction::UpdateSetting,
            target_type: "setting",
            target_id: "price_per_minute_cents".into(),
            notes: None,
            details: Some(serde_json::json!({ "value": "150" })),
        }
    }

    #[tokio::test]
    async fn test_record_appends_entry() {
        let repo = Arc::new(MemoryRepository::new());
        let logger = AuditLogger::new(repo.clone());
        let actor = actor();

        let receipt = logger.record(&actor, entry(), AuditOutcome::Succeeded).await;
        assert!(receipt.logged);

        let logs = repo
            .list_audit_logs(&AuditLogFilter::default())
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(Some(logs[0].id), receipt.log_id);
        assert_eq!(logs[0].actor_id, actor.user_id);
        assert_eq!(logs[0].actor_role, Role::SuperAdmin);
    }

    #[tokio::test]
    async fn test_append_failure_is_reported_not_raised() {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_audit_failure(true);
        let logger = AuditLogger::new(repo);

        let receipt = logger.record(&actor(), entry(), AuditOutcome::Failed).await;
        assert!(!receipt.logged);
        assert!(receipt.log_id.is_none());
        assert!(receipt.error.is_some());
    }
}
