//! JetStream notification source
//!
//! Reads notifications published by [`crate::NotificationPublisher`]. The
//! cursor is the JetStream stream sequence, so a resumed subscription starts
//! with `DeliverPolicy::ByStartSequence` right after the checkpoint.

use crate::{
    client::NatsClient, metrics::NOTIFICATION_RECEIVE_TOTAL, source::NotificationStream, Error,
    NotificationSource, Result, SourcedNotification,
};
use async_nats::jetstream::consumer::{pull, AckPolicy, DeliverPolicy, ReplayPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use ledger_core::Notification;
use std::sync::Arc;
use tracing::{info, warn};

/// Source consuming the notification stream through an ephemeral pull consumer
#[derive(Clone)]
pub struct JetStreamSource {
    client: Arc<NatsClient>,
}

impl JetStreamSource {
    /// Source reading the stream configured on `client`
    pub fn new(client: Arc<NatsClient>) -> Self {
        Self { client }
    }
}

/// Where a consumer starts for a given cursor
pub fn deliver_policy(resume_after: Option<u64>) -> DeliverPolicy {
    match resume_after {
        Some(sequence) => DeliverPolicy::ByStartSequence {
            start_sequence: sequence + 1,
        },
        None => DeliverPolicy::New,
    }
}

#[async_trait]
impl NotificationSource for JetStreamSource {
    fn name(&self) -> &str {
        "jetstream"
    }

    async fn subscribe(&self, resume_after: Option<u64>) -> Result<NotificationStream> {
        let stream = self.client.ensure_stream().await?;

        info!(
            stream = %self.client.config().stream_name,
            resume_after = ?resume_after,
            "Creating JetStream consumer"
        );

        let consumer_config = pull::Config {
            description: Some("Ledger projection listener".to_string()),
            filter_subject: self.client.config().subject.clone(),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: deliver_policy(resume_after),
            replay_policy: ReplayPolicy::Instant,
            ..Default::default()
        };

        let consumer = stream
            .create_consumer(consumer_config)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let stream = messages
            .then(|received| async move {
                let message = received.map_err(|e| Error::Nats(e.to_string()))?;
                let cursor = message
                    .info()
                    .map_err(|e| Error::Nats(e.to_string()))?
                    .stream_sequence;
                let notification = Notification::from_bytes(&message.payload)
                    .map_err(|e| Error::Subscribe(format!("undecodable notification at {}: {}", cursor, e)))?;

                // The listener checkpoints cursors itself; acking only releases redelivery
                if let Err(e) = message.ack().await {
                    warn!(cursor, error = %e, "Failed to ack notification");
                }

                NOTIFICATION_RECEIVE_TOTAL
                    .with_label_values(&["jetstream", "live"])
                    .inc();
                Ok(SourcedNotification {
                    cursor,
                    notification,
                })
            })
            .boxed();

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_policy_resumes_after_cursor() {
        assert!(matches!(
            deliver_policy(Some(41)),
            DeliverPolicy::ByStartSequence { start_sequence: 42 }
        ));
        assert!(matches!(deliver_policy(Some(0)), DeliverPolicy::ByStartSequence { start_sequence: 1 }));
        assert!(matches!(deliver_policy(None), DeliverPolicy::New));
    }
}
