use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::OutputFormat;

/// Completion report posted by an external transcription worker.
#[derive(Debug, Clone, Deserialize)]
pub struct JobCallback {
    pub order_id: Uuid,
    pub status: JobCallbackStatus,
    #[serde(default)]
    pub files: Vec<GeneratedSubtitle>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobCallbackStatus {
    Succeeded,
    Failed,
}

/// One produced subtitle file, as reported by a transcription backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSubtitle {
    pub video_id: Option<Uuid>,
    pub format: OutputFormat,
    pub download_location: String,
}

#[derive(Debug, Serialize)]
pub struct JobCallbackAccepted {
    pub accepted: bool,
    pub order_id: Uuid,
}
