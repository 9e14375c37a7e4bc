use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::services::metrics;
use crate::services::repository::Repository;
use crate::workers::events::JobEvent;
use crate::workers::transcriber::{Transcriber, TranscriptionError, TranscriptionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTrigger {
    /// First run after payment; the worker moves the order to processing.
    Payment,
    /// The order is already processing again by the time the job runs.
    AdminReprocess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionJob {
    pub order_id: Uuid,
    pub trigger: JobTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("transcription queue is full")]
    QueueFull,
    #[error("transcription queue is closed")]
    Closed,
}

/// Producer side of the job queue. Never blocks.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<TranscriptionJob>,
}

impl JobQueue {
    pub fn submit(&self, job: TranscriptionJob) -> Result<(), DispatchError> {
        let order_id = job.order_id;
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })?;
        tracing::debug!(order_id = %order_id, "Transcription job queued");
        Ok(())
    }
}

pub struct WorkerPool {
    config: WorkerConfig,
    repo: Arc<dyn Repository>,
    transcriber: Arc<dyn Transcriber>,
    events: mpsc::Sender<JobEvent>,
    job_rx: Option<mpsc::Receiver<TranscriptionJob>>,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        repo: Arc<dyn Repository>,
        transcriber: Arc<dyn Transcriber>,
        events: mpsc::Sender<JobEvent>,
    ) -> (Self, JobQueue) {
        let (tx, job_rx) = mpsc::channel(config.queue_size);

        let pool = Self {
            config,
            repo,
            transcriber,
            events,
            job_rx: Some(job_rx),
            shutdown_token: CancellationToken::new(),
        };

        (pool, JobQueue { tx })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn start(mut self) {
        if !self.config.enabled {
            tracing::info!("Worker pool disabled by configuration");
            return;
        }

        let Some(mut job_rx) = self.job_rx.take() else {
            tracing::warn!("Worker pool already started");
            return;
        };

        tracing::info!(
            worker_count = self.config.worker_count,
            queue_size = self.config.queue_size,
            "Starting worker pool"
        );

        let max_retry = Duration::from_secs(self.config.max_retry_seconds);
        let workers: Vec<Worker> = (0..self.config.worker_count.max(1))
            .map(|id| Worker {
                id,
                repo: self.repo.clone(),
                transcriber: self.transcriber.clone(),
                events: self.events.clone(),
                max_retry,
            })
            .collect();

        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            let mut next_worker = 0;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Job distributor shutting down");
                        break;
                    }
                    job = job_rx.recv() => {
                        match job {
                            Some(job) => {
                                let worker = workers[next_worker].clone();
                                next_worker = (next_worker + 1) % workers.len();

                                tracing::info!(
                                    worker_id = worker.id,
                                    order_id = %job.order_id,
                                    trigger = ?job.trigger,
                                    "Dispatching job to worker"
                                );

                                tokio::spawn(async move {
                                    worker.process_job(job).await;
                                });
                            }
                            None => {
                                tracing::info!("Channel closed, job distributor exiting");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating worker pool shutdown");
        self.shutdown_token.cancel();
    }
}

#[derive(Clone)]
struct Worker {
    id: usize,
    repo: Arc<dyn Repository>,
    transcriber: Arc<dyn Transcriber>,
    events: mpsc::Sender<JobEvent>,
    max_retry: Duration,
}

impl Worker {
    async fn process_job(&self, job: TranscriptionJob) {
        let order_id = job.order_id;
        let start = Instant::now();

        let order = match self.repo.find_order(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                tracing::error!(worker_id = self.id, order_id = %order_id, "Queued order no longer exists");
                return;
            }
            Err(e) => {
                tracing::error!(worker_id = self.id, order_id = %order_id, error = %e, "Failed to load queued order");
                self.emit(JobEvent::Failed {
                    order_id,
                    reason: format!("could not load order: {}", e),
                })
                .await;
                return;
            }
        };

        if job.trigger == JobTrigger::Payment {
            self.emit(JobEvent::Started { order_id }).await;
        }

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(self.max_retry),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.transcriber.transcribe(&order).await.map_err(|e| match e {
                TranscriptionError::Transient(_) => {
                    tracing::warn!(worker_id = self.id, order_id = %order_id, error = %e, "Transcription attempt failed, retrying");
                    backoff::Error::transient(e)
                }
                TranscriptionError::Permanent(_) => backoff::Error::permanent(e),
            })
        })
        .await;

        let event = match result {
            Ok(TranscriptionOutcome::Completed(files)) => {
                metrics::record_job("succeeded");
                tracing::info!(
                    worker_id = self.id,
                    order_id = %order_id,
                    files = files.len(),
                    duration_ms = start.elapsed().as_millis(),
                    "Transcription succeeded"
                );
                JobEvent::Succeeded { order_id, files }
            }
            Ok(TranscriptionOutcome::Accepted { external_job_id }) => {
                metrics::record_job("accepted");
                tracing::info!(
                    worker_id = self.id,
                    order_id = %order_id,
                    external_job_id = %external_job_id,
                    "Transcription accepted, awaiting callback"
                );
                JobEvent::Accepted {
                    order_id,
                    external_job_id,
                }
            }
            Err(e) => {
                metrics::record_job("failed");
                tracing::error!(
                    worker_id = self.id,
                    order_id = %order_id,
                    error = %e,
                    duration_ms = start.elapsed().as_millis(),
                    "Transcription failed"
                );
                JobEvent::Failed {
                    order_id,
                    reason: e.to_string(),
                }
            }
        };

        self.emit(event).await;
    }

    async fn emit(&self, event: JobEvent) {
        if let Err(e) = self.events.send(event).await {
            tracing::error!(worker_id = self.id, event = ?e.0, "Job event channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::models::{Order, SubtitleConfig, VideoRef};
    use crate::services::repository::{MemoryRepository, OrderRepository};
    use crate::workers::transcriber::MockTranscriber;
    use std::sync::atomic::Ordering;

    async fn setup(
        transcriber: Arc<MockTranscriber>,
        max_retry_seconds: u64,
    ) -> (WorkerPool, JobQueue, mpsc::Receiver<JobEvent>, Uuid) {
        let repo = Arc::new(MemoryRepository::new());
        let order = Order::new(
            Uuid::new_v4(),
            vec![VideoRef {
                id: Uuid::new_v4(),
                original_filename: "talk.mp4".into(),
                storage_key: "videos/talk.mp4".into(),
                duration_seconds: 60,
            }],
            SubtitleConfig::default(),
            100,
            "usd".into(),
        )
        .unwrap();
        repo.insert_order(&order).await.unwrap();

        let mut config = test_config().workers;
        config.max_retry_seconds = max_retry_seconds;

        let (events_tx, events_rx) = mpsc::channel(16);
        let (pool, queue) = WorkerPool::new(config, repo, transcriber, events_tx);
        (pool, queue, events_rx, order.id)
    }

    #[tokio::test]
    async fn test_payment_job_emits_started_then_succeeded() {
        let transcriber = Arc::new(MockTranscriber::completing());
        let (pool, queue, mut events, order_id) = setup(transcriber, 5).await;
        pool.start().await;

        queue
            .submit(TranscriptionJob {
                order_id,
                trigger: JobTrigger::Payment,
            })
            .unwrap();

        assert_eq!(events.recv().await, Some(JobEvent::Started { order_id }));
        match events.recv().await {
            Some(JobEvent::Succeeded { order_id: id, files }) => {
                assert_eq!(id, order_id);
                assert_eq!(files.len(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reprocess_job_skips_started() {
        let transcriber = Arc::new(MockTranscriber::completing());
        let (pool, queue, mut events, order_id) = setup(transcriber, 5).await;
        pool.start().await;

        queue
            .submit(TranscriptionJob {
                order_id,
                trigger: JobTrigger::AdminReprocess,
            })
            .unwrap();

        assert!(matches!(
            events.recv().await,
            Some(JobEvent::Succeeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let transcriber = Arc::new(MockTranscriber::flaky(2));
        let (pool, queue, mut events, order_id) = setup(transcriber.clone(), 10).await;
        pool.start().await;

        queue
            .submit(TranscriptionJob {
                order_id,
                trigger: JobTrigger::AdminReprocess,
            })
            .unwrap();

        assert!(matches!(
            events.recv().await,
            Some(JobEvent::Succeeded { .. })
        ));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_without_retry() {
        let transcriber = Arc::new(MockTranscriber::failing("unsupported codec"));
        let (pool, queue, mut events, order_id) = setup(transcriber.clone(), 10).await;
        pool.start().await;

        queue
            .submit(TranscriptionJob {
                order_id,
                trigger: JobTrigger::AdminReprocess,
            })
            .unwrap();

        match events.recv().await {
            Some(JobEvent::Failed { reason, .. }) => assert!(reason.contains("unsupported codec")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_reports_full_and_closed_queue() {
        let transcriber = Arc::new(MockTranscriber::completing());
        let repo = Arc::new(MemoryRepository::new());
        let mut config = test_config().workers;
        config.queue_size = 1;
        let (events_tx, _events_rx) = mpsc::channel(1);
        let (pool, queue) = WorkerPool::new(config, repo, transcriber, events_tx);

        let job = TranscriptionJob {
            order_id: Uuid::new_v4(),
            trigger: JobTrigger::Payment,
        };
        assert_eq!(queue.submit(job.clone()), Ok(()));
        assert_eq!(queue.submit(job.clone()), Err(DispatchError::QueueFull));

        drop(pool);
        assert_eq!(queue.submit(job), Err(DispatchError::Closed));
    }
}
