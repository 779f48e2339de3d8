//! Queue workers
//!
//! The event worker applies queued records in order. A record it cannot
//! apply is marked failed and handed to the error queue, whose worker
//! re-reads the authoritative document from the ledger instead of retrying
//! the same payload.

use crate::errors::{ProjectorError, Result};
use crate::fetcher::DocumentFetcher;
use crate::handlers::{HandlerRegistry, JobData};
use crate::keys::decode_document_key;
use crate::metrics::{PROJECTOR_DEAD_LETTERS_TOTAL, PROJECTOR_JOBS_TOTAL, PROJECTOR_JOB_DURATION};
use crate::queue::{FollowUp, Job, JobQueue, JobState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_bus::publisher::stopping;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Payload of an error-queue job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorJobData {
    pub original_job: JobData,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorJobData {
    pub fn new(original_job: JobData, error: &ProjectorError) -> Self {
        Self {
            original_job,
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Hand a failed record to the error queue
pub async fn enqueue_error_job(
    queue: &JobQueue,
    error_queue: &str,
    original_job: JobData,
    error: &ProjectorError,
) -> Result<()> {
    let data = serde_json::to_value(ErrorJobData::new(original_job, error))?;
    queue.send(error_queue, &Uuid::new_v4().to_string(), &data).await?;
    Ok(())
}

#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Settle `job`; errors mean the job's state could not be recorded
    async fn process(&self, job: &Job) -> Result<()>;
}

/// Applies main-queue jobs
pub struct EventWorker {
    queue: Arc<JobQueue>,
    registry: Arc<HandlerRegistry>,
    event_queue: String,
    error_queue: String,
}

impl EventWorker {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<HandlerRegistry>,
        event_queue: impl Into<String>,
        error_queue: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            registry,
            event_queue: event_queue.into(),
            error_queue: error_queue.into(),
        }
    }
}

#[async_trait]
impl JobProcessor for EventWorker {
    fn queue_name(&self) -> &str {
        &self.event_queue
    }

    async fn process(&self, job: &Job) -> Result<()> {
        let data: JobData = match serde_json::from_value(job.data.clone()) {
            Ok(data) => data,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Undecodable event job");
                self.queue.fail(&self.event_queue, &job.id, &e.to_string()).await?;
                PROJECTOR_JOBS_TOTAL
                    .with_label_values(&[&self.event_queue, "failed"])
                    .inc();
                return Ok(());
            }
        };

        match self.registry.handle_job(&data).await {
            Ok(()) => {
                self.queue.complete(&self.event_queue, &job.id).await?;
                PROJECTOR_JOBS_TOTAL
                    .with_label_values(&[&self.event_queue, "completed"])
                    .inc();
            }
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    event_type = %data.event_type,
                    error = %e,
                    "Event job failed, scheduling reconciliation"
                );
                let error_job = serde_json::to_value(ErrorJobData::new(data, &e))?;
                let error_job_id = Uuid::new_v4().to_string();
                let follow_up = FollowUp {
                    queue: &self.error_queue,
                    id: &error_job_id,
                    data: &error_job,
                };
                self.queue
                    .fail_and_send(&self.event_queue, &job.id, &e.to_string(), &follow_up)
                    .await?;
                PROJECTOR_JOBS_TOTAL
                    .with_label_values(&[&self.event_queue, "failed"])
                    .inc();
            }
        }
        Ok(())
    }
}

/// Resyncs documents named by error-queue jobs
pub struct ReconcileWorker {
    queue: Arc<JobQueue>,
    registry: Arc<HandlerRegistry>,
    fetcher: Arc<dyn DocumentFetcher>,
    error_queue: String,
}

impl ReconcileWorker {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<HandlerRegistry>,
        fetcher: Arc<dyn DocumentFetcher>,
        error_queue: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            registry,
            fetcher,
            error_queue: error_queue.into(),
        }
    }

    /// Rewrite the projection row from the ledger; returns the document key
    pub async fn reconcile(&self, data: &ErrorJobData) -> Result<String> {
        let original = &data.original_job;
        let key = decode_document_key(&original.document_key);

        let handler = self
            .registry
            .get(&original.event_type)
            .ok_or_else(|| ProjectorError::UnknownEventType(original.event_type.clone()))?;

        let document = self
            .fetcher
            .fetch_document(&key)
            .await
            .map_err(|e| ProjectorError::Reconciliation {
                key: original.document_key.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| ProjectorError::Reconciliation {
                key: original.document_key.clone(),
                reason: "document not found on the ledger".to_string(),
            })?;

        handler.sync_document(&document).await?;
        Ok(key)
    }
}

#[async_trait]
impl JobProcessor for ReconcileWorker {
    fn queue_name(&self) -> &str {
        &self.error_queue
    }

    async fn process(&self, job: &Job) -> Result<()> {
        let result = match serde_json::from_value::<ErrorJobData>(job.data.clone()) {
            Ok(data) => self.reconcile(&data).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(key) => {
                self.queue.delete(&self.error_queue, &job.id).await?;
                PROJECTOR_JOBS_TOTAL
                    .with_label_values(&[&self.error_queue, "reconciled"])
                    .inc();
                info!(job_id = %job.id, key = %key.escape_debug(), "Projection reconciled from ledger");
            }
            Err(e) => {
                let state = self.queue.fail(&self.error_queue, &job.id, &e.to_string()).await?;
                if state == JobState::Failed {
                    PROJECTOR_DEAD_LETTERS_TOTAL
                        .with_label_values(&[&self.error_queue])
                        .inc();
                    error!(
                        job_id = %job.id,
                        attempts = job.retry_count + 1,
                        error = %e,
                        "Reconciliation retries exhausted, job left as dead letter"
                    );
                } else {
                    warn!(job_id = %job.id, error = %e, "Reconciliation failed, will retry");
                }
                PROJECTOR_JOBS_TOTAL
                    .with_label_values(&[&self.error_queue, state.as_str()])
                    .inc();
            }
        }
        Ok(())
    }
}

/// Poll `processor`'s queue one job at a time until shutdown
pub async fn run_worker(
    processor: Arc<dyn JobProcessor>,
    queue: Arc<JobQueue>,
    polling_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = processor.queue_name().to_string();
    info!(queue = %name, "Worker started");

    while !stopping(&shutdown) {
        match queue.fetch(&name).await {
            Ok(Some(job)) => {
                let timer = PROJECTOR_JOB_DURATION.with_label_values(&[&name]).start_timer();
                if let Err(e) = processor.process(&job).await {
                    error!(queue = %name, job_id = %job.id, error = %e, "Failed to settle job");
                    if let Err(e) = queue.release(&name, &job.id).await {
                        error!(queue = %name, job_id = %job.id, error = %e, "Failed to release job");
                    }
                }
                timer.observe_duration();
                continue;
            }
            Ok(None) => {}
            Err(e) => error!(queue = %name, error = %e, "Failed to fetch job"),
        }

        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(polling_interval) => {}
        }
    }

    info!(queue = %name, "Worker stopped");
}
