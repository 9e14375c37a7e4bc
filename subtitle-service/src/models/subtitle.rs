use super::{OutputFormat, UnknownVariant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Review state of a generated subtitle file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl QaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaStatus::Pending => "pending",
            QaStatus::Approved => "approved",
            QaStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for QaStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QaStatus::Pending),
            "approved" => Ok(QaStatus::Approved),
            "rejected" => Ok(QaStatus::Rejected),
            other => Err(UnknownVariant::new("qa status", other)),
        }
    }
}

impl TryFrom<String> for QaStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Output of a transcription job. Created by background processing; only the
/// QA fields change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubtitleFile {
    pub id: Uuid,
    pub order_id: Uuid,
    pub video_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub format: OutputFormat,
    #[sqlx(try_from = "String")]
    pub qa_status: QaStatus,
    pub qa_notes: Option<String>,
    pub download_location: String,
    pub created_at: DateTime<Utc>,
}

impl SubtitleFile {
    pub fn generated(
        order_id: Uuid,
        video_id: Option<Uuid>,
        format: OutputFormat,
        download_location: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            video_id,
            format,
            qa_status: QaStatus::Pending,
            qa_notes: None,
            download_location,
            created_at: Utc::now(),
        }
    }
}
