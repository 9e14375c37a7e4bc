pub mod audit_log;
pub mod notification;
pub mod order;
pub mod role;
pub mod setting;
pub mod subtitle;
pub mod user;

pub use audit_log::{AdminAction, AdminActionLog, AuditLogFilter, AuditOutcome};
pub use notification::Notification;
pub use order::{
    Genre, Order, OrderChanges, OrderEvent, OrderFilter, OrderStatus, OutputFormat,
    PaymentStatus, PricingError, SubtitleConfig, TransitionError, VideoRef,
};
pub use role::{Permission, Role};
pub use setting::{SettingKey, SystemSetting};
pub use subtitle::{QaStatus, SubtitleFile};
pub use user::{User, UserFilter};

use thiserror::Error;

/// A stored or submitted string that names no known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
