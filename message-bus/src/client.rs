//! NATS JetStream client

use crate::{Error, Result};
use async_nats::jetstream::{
    self,
    stream::{Config as StreamConfig, RetentionPolicy, Stream, StorageType},
    Context as JetStreamContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// NATS connection and stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Stream holding ledger notifications
    pub stream_name: String,

    /// Subject notifications are published on
    pub subject: String,

    /// Retention of the stream in seconds
    pub max_age_secs: u64,

    /// Publisher deduplication window in seconds
    pub duplicate_window_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "LEDGER_NOTIFICATIONS".to_string(),
            subject: "ledger.notifications".to_string(),
            max_age_secs: 7 * 24 * 3600, // 7 days
            duplicate_window_secs: 300,  // 5 min deduplication
        }
    }
}

/// Connected JetStream client
#[derive(Clone)]
pub struct NatsClient {
    context: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to the server in `config`
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS JetStream");

        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            context: jetstream::new(client),
            config,
        })
    }

    /// JetStream context
    pub fn jetstream(&self) -> &JetStreamContext {
        &self.context
    }

    /// Settings this client was created with
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Create the notification stream if it does not exist
    pub async fn ensure_stream(&self) -> Result<Stream> {
        let config = StreamConfig {
            name: self.config.stream_name.clone(),
            description: Some("Ledger transaction notifications".to_string()),
            subjects: vec![self.config.subject.clone()],
            retention: RetentionPolicy::Limits,
            max_age: Duration::from_secs(self.config.max_age_secs),
            storage: StorageType::File,
            duplicate_window: Duration::from_secs(self.config.duplicate_window_secs),
            ..Default::default()
        };

        match self.context.get_or_create_stream(config).await {
            Ok(stream) => {
                info!(stream = %self.config.stream_name, "Stream ready");
                Ok(stream)
            }
            Err(e) => {
                error!(stream = %self.config.stream_name, error = %e, "Failed to create stream");
                Err(Error::Stream(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = NatsConfig::default();
        assert_eq!(config.stream_name, "LEDGER_NOTIFICATIONS");
        assert_eq!(config.subject, "ledger.notifications");
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_stream_creation() {
        let client = NatsClient::connect(NatsConfig::default())
            .await
            .expect("Failed to connect");
        client.ensure_stream().await.expect("Failed to create stream");
    }
}
