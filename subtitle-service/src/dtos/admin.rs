use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Order, QaStatus, Role, SubtitleFile, SystemSetting, User};
use crate::services::audit::AuditReceipt;
use crate::services::repository::{OrderStats, UserCounts};

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSettingRequest {
    #[validate(length(min = 1, max = 64))]
    pub value: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOrderRequest {
    #[validate(length(min = 1, max = 2000))]
    pub admin_notes: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReprocessRequest {
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RefundRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QaStatusRequest {
    pub qa_status: QaStatus,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_days_back")]
    pub days_back: i64,
}

fn default_days_back() -> i64 {
    30
}

#[derive(Debug, Serialize)]
pub struct AdminStats {
    pub days_back: i64,
    #[serde(flatten)]
    pub orders: OrderStats,
    #[serde(flatten)]
    pub users: UserCounts,
}

/// What a successful admin command changed.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AdminCommandResult {
    User(User),
    Order(Order),
    Setting(SystemSetting),
    Subtitle(SubtitleFile),
}

#[derive(Debug, Serialize)]
pub struct AdminActionResponse {
    pub result: AdminCommandResult,
    pub audit: AuditReceipt,
}
