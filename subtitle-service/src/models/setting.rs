//! Runtime-tunable platform settings, editable by admins.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
}

/// Settings the platform reads. Each is a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    PricePerMinuteCents,
    MaxFileSizeBytes,
    MaxFilesPerOrder,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::PricePerMinuteCents,
        SettingKey::MaxFileSizeBytes,
        SettingKey::MaxFilesPerOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::PricePerMinuteCents => "price_per_minute_cents",
            SettingKey::MaxFileSizeBytes => "max_file_size_bytes",
            SettingKey::MaxFilesPerOrder => "max_files_per_order",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    pub fn default_value(&self) -> i64 {
        match self {
            SettingKey::PricePerMinuteCents => 100,
            SettingKey::MaxFileSizeBytes => 1_073_741_824,
            SettingKey::MaxFilesPerOrder => 10,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SettingKey::PricePerMinuteCents => "Price per minute of video, in cents",
            SettingKey::MaxFileSizeBytes => "Maximum upload size per video, in bytes",
            SettingKey::MaxFilesPerOrder => "Maximum number of videos per order",
        }
    }

    /// Parses a submitted value, rejecting anything that is not a positive integer.
    pub fn parse_value(&self, raw: &str) -> Result<i64, String> {
        match raw.trim().parse::<i64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(format!(
                "{} must be a positive integer, got '{}'",
                self.as_str(),
                raw
            )),
        }
    }

    pub fn seed(&self) -> SystemSetting {
        SystemSetting {
            key: self.as_str().to_string(),
            value: self.default_value().to_string(),
            description: Some(self.description().to_string()),
            updated_at: Utc::now(),
            updated_by: None,
        }
    }
}
