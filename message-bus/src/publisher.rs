//! Notification publisher with retry logic
//!
//! Bridges ledger notifications onto JetStream. Each message carries the
//! ledger sequence as `Nats-Msg-Id`, so re-publishing after a restart is
//! deduplicated by the stream within its duplicate window.

use crate::{
    client::NatsClient,
    metrics::{NOTIFICATION_PUBLISH_DURATION, NOTIFICATION_PUBLISH_TOTAL},
    source::NotificationSource,
    Error, Result,
};
use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use futures::StreamExt;
use ledger_core::Notification;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Header carrying the ledger sequence
pub const SEQUENCE_HEADER: &str = "Ledger-Sequence";

/// Publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Initial retry delay in milliseconds
    pub initial_retry_delay_ms: u64,

    /// Max retry delay in milliseconds
    pub max_retry_delay_ms: u64,

    /// Give up on one notification after this many seconds
    pub max_elapsed_secs: u64,

    /// Wait before resubscribing to the ledger after an error
    pub resubscribe_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 2_000,
            max_elapsed_secs: 30,
            resubscribe_delay_ms: 1_000,
        }
    }
}

impl PublisherConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_retry_delay_ms))
            .with_max_interval(Duration::from_millis(self.max_retry_delay_ms))
            .with_max_elapsed_time(Some(Duration::from_secs(self.max_elapsed_secs)))
            .build()
    }
}

/// Publishes ledger notifications to JetStream
pub struct NotificationPublisher {
    client: Arc<NatsClient>,
    config: PublisherConfig,
}

impl NotificationPublisher {
    /// Create new publisher
    pub fn new(client: Arc<NatsClient>, config: PublisherConfig) -> Self {
        Self { client, config }
    }

    /// Publish one notification, retrying with exponential backoff
    pub async fn publish(&self, notification: &Notification) -> Result<()> {
        let start = Instant::now();
        let payload = notification.to_bytes()?;

        let result = retry(self.config.backoff(), || async {
            self.publish_once(notification.sequence, &payload)
                .await
                .map_err(|e| {
                    warn!(sequence = notification.sequence, error = %e, "Publish failed, retrying");
                    backoff::Error::transient(e)
                })
        })
        .await;

        NOTIFICATION_PUBLISH_DURATION.observe(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "success" } else { "error" };
        NOTIFICATION_PUBLISH_TOTAL.with_label_values(&[status]).inc();

        if let Err(e) = &result {
            error!(sequence = notification.sequence, error = %e, "Giving up on notification");
        }
        result
    }

    /// Single publish attempt, waiting for the stream acknowledgment
    async fn publish_once(&self, sequence: u64, payload: &[u8]) -> Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        let sequence = sequence.to_string();
        headers.insert("Nats-Msg-Id", sequence.as_str());
        headers.insert(SEQUENCE_HEADER, sequence.as_str());

        self.client
            .jetstream()
            .publish_with_headers(
                self.client.config().subject.clone(),
                headers,
                payload.to_vec().into(),
            )
            .await
            .map_err(|e| Error::Publish(e.to_string()))?
            .await
            .map_err(|e| Error::Publish(format!("Publish ack failed: {}", e)))?;

        Ok(())
    }

    /// Forward notifications from `source` until `shutdown` flips
    ///
    /// Starts after `resume_after` and resubscribes after stream errors,
    /// continuing from the last published sequence.
    pub async fn forward(
        &self,
        source: &dyn NotificationSource,
        mut resume_after: Option<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.client.ensure_stream().await?;
        info!(source = source.name(), resume_after = ?resume_after, "Forwarding notifications to JetStream");

        while !stopping(&shutdown) {
            let mut stream = match source.subscribe(resume_after).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "Failed to subscribe to notifications");
                    self.pause(&mut shutdown).await;
                    continue;
                }
            };

            loop {
                let next = tokio::select! {
                    _ = shutdown.changed() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(sourced)) => {
                        self.publish(&sourced.notification).await?;
                        resume_after = Some(sourced.cursor);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Notification stream failed, resubscribing");
                        break;
                    }
                    None => break,
                }
            }

            self.pause(&mut shutdown).await;
        }

        info!("Notification forwarding stopped");
        Ok(())
    }

    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) {
        if stopping(shutdown) {
            return;
        }
        let delay = Duration::from_millis(self.config.resubscribe_delay_ms);
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Shutdown was requested or its sender is gone
pub fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
