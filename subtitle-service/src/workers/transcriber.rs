//! Client for the external speech-to-subtitle backend.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::observability::outbound_headers;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::dtos::jobs::GeneratedSubtitle;
use crate::models::{Order, SubtitleConfig, VideoRef};

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionOutcome {
    /// Subtitles were produced synchronously.
    Completed(Vec<GeneratedSubtitle>),
    /// The backend queued the work and will report through the job callback.
    Accepted { external_job_id: String },
}

#[derive(Debug, Clone, Error)]
pub enum TranscriptionError {
    #[error("transcription backend unavailable: {0}")]
    Transient(String),
    #[error("transcription rejected: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, order: &Order) -> Result<TranscriptionOutcome, TranscriptionError>;
}

#[derive(Debug, Serialize)]
struct TranscriptionRequest<'a> {
    order_id: Uuid,
    videos: &'a [VideoRef],
    subtitle_config: &'a SubtitleConfig,
}

#[derive(Debug, Deserialize)]
struct CompletedResponse {
    files: Vec<GeneratedSubtitle>,
}

#[derive(Debug, Deserialize)]
struct AcceptedResponse {
    job_id: String,
}

pub struct HttpTranscriber {
    client: Client,
    endpoint: String,
    api_key: Secret<String>,
}

impl HttpTranscriber {
    pub fn new(config: &WorkerConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: config.transcription_endpoint.trim_end_matches('/').to_string(),
            api_key: config.transcription_api_key.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, order: &Order) -> Result<TranscriptionOutcome, TranscriptionError> {
        let body = TranscriptionRequest {
            order_id: order.id,
            videos: &order.videos,
            subtitle_config: &order.subtitle_config,
        };

        let mut request = self
            .client
            .post(format!("{}/jobs", self.endpoint))
            .headers(outbound_headers(None))
            .json(&body);
        if !self.api_key.expose_secret().is_empty() {
            request = request.bearer_auth(self.api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranscriptionError::Transient(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body: CompletedResponse = response
                    .json()
                    .await
                    .map_err(|e| TranscriptionError::Permanent(format!("invalid response: {}", e)))?;
                Ok(TranscriptionOutcome::Completed(body.files))
            }
            StatusCode::ACCEPTED => {
                let body: AcceptedResponse = response
                    .json()
                    .await
                    .map_err(|e| TranscriptionError::Permanent(format!("invalid response: {}", e)))?;
                Ok(TranscriptionOutcome::Accepted {
                    external_job_id: body.job_id,
                })
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                Err(TranscriptionError::Transient(format!("status {}", s)))
            }
            s => {
                let text = response.text().await.unwrap_or_default();
                Err(TranscriptionError::Permanent(format!("status {}: {}", s, text)))
            }
        }
    }
}

enum MockMode {
    Complete,
    Accept,
    FailTransientTimes(usize),
    FailPermanent(String),
}

/// Produces one `.srt` per video without any network access.
pub struct MockTranscriber {
    mode: MockMode,
    pub calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn completing() -> Self {
        Self {
            mode: MockMode::Complete,
            calls: AtomicUsize::new(0),
        }
    }

    /// Hands every job off as if the backend will report through the callback.
    pub fn accepting() -> Self {
        Self {
            mode: MockMode::Accept,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails transiently `times` times, then completes.
    pub fn flaky(times: usize) -> Self {
        Self {
            mode: MockMode::FailTransientTimes(times),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            mode: MockMode::FailPermanent(reason.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, order: &Order) -> Result<TranscriptionOutcome, TranscriptionError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.mode {
            MockMode::FailPermanent(reason) => {
                return Err(TranscriptionError::Permanent(reason.clone()))
            }
            MockMode::FailTransientTimes(times) if attempt < *times => {
                return Err(TranscriptionError::Transient("backend busy".into()))
            }
            MockMode::Accept => {
                return Ok(TranscriptionOutcome::Accepted {
                    external_job_id: format!("mock-{}", order.id.simple()),
                })
            }
            _ => {}
        }

        let format = order.subtitle_config.output_format;
        let files = order
            .videos
            .iter()
            .map(|video| GeneratedSubtitle {
                video_id: Some(video.id),
                format,
                download_location: format!(
                    "subtitles/{}/{}.{}",
                    order.id,
                    video.id,
                    format.as_str()
                ),
            })
            .collect();

        Ok(TranscriptionOutcome::Completed(files))
    }
}
