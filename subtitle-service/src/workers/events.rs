use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dtos::jobs::GeneratedSubtitle;
use crate::models::{OrderChanges, OrderEvent, SubtitleFile};
use crate::services::error::ServiceError;
use crate::services::orders::OrderService;

/// Progress reported by a worker or a transcription callback.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started {
        order_id: Uuid,
    },
    Succeeded {
        order_id: Uuid,
        files: Vec<GeneratedSubtitle>,
    },
    Failed {
        order_id: Uuid,
        reason: String,
    },
    Accepted {
        order_id: Uuid,
        external_job_id: String,
    },
}

impl JobEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            JobEvent::Started { order_id }
            | JobEvent::Succeeded { order_id, .. }
            | JobEvent::Failed { order_id, .. }
            | JobEvent::Accepted { order_id, .. } => *order_id,
        }
    }
}

/// Applies job events to orders, one at a time, in arrival order.
pub struct JobEventConsumer {
    orders: OrderService,
    rx: mpsc::Receiver<JobEvent>,
}

impl JobEventConsumer {
    pub fn new(orders: OrderService, rx: mpsc::Receiver<JobEvent>) -> Self {
        Self { orders, rx }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Job event consumer started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Job event consumer shutting down");
                    break;
                }
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Job event channel closed");
                        break;
                    };
                    let order_id = event.order_id();
                    if let Err(e) = self.handle(event).await {
                        tracing::warn!(order_id = %order_id, error = %e, "Job event not applied");
                    }
                }
            }
        }
    }

    pub async fn handle(&self, event: JobEvent) -> Result<(), ServiceError> {
        match event {
            JobEvent::Started { order_id } => {
                self.orders
                    .apply_event(order_id, OrderEvent::JobStarted, OrderChanges::default())
                    .await?;
            }
            JobEvent::Succeeded { order_id, files } => {
                let files: Vec<SubtitleFile> = files
                    .into_iter()
                    .map(|f| {
                        SubtitleFile::generated(order_id, f.video_id, f.format, f.download_location)
                    })
                    .collect();
                let count = files.len();
                let changes = OrderChanges {
                    subtitle_files: files,
                    ..Default::default()
                };

                match self
                    .orders
                    .apply_event(order_id, OrderEvent::JobSucceeded, changes)
                    .await
                {
                    Ok(_) => {
                        tracing::info!(order_id = %order_id, files = count, "Subtitle files stored");
                    }
                    Err(ServiceError::Storage(e)) => {
                        // Completed orders must have their files; park it as failed for reprocessing.
                        tracing::error!(order_id = %order_id, error = %e, "Subtitle files not stored");
                        self.orders
                            .apply_event(order_id, OrderEvent::JobFailed, OrderChanges::default())
                            .await?;
                        return Err(ServiceError::Storage(e));
                    }
                    Err(e) => return Err(e),
                }
            }
            JobEvent::Failed { order_id, reason } => {
                tracing::warn!(order_id = %order_id, reason = %reason, "Transcription job failed");
                self.orders
                    .apply_event(order_id, OrderEvent::JobFailed, OrderChanges::default())
                    .await?;
            }
            JobEvent::Accepted {
                order_id,
                external_job_id,
            } => {
                tracing::info!(
                    order_id = %order_id,
                    external_job_id = %external_job_id,
                    "Waiting for transcription callback"
                );
            }
        }
        Ok(())
    }
}
