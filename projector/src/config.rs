use crate::errors::{ProjectorError, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use message_bus::{NatsConfig, PublisherConfig};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub listener: ListenerConfig,
    pub queue: QueueConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub ledger: ledger_core::Config,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Schema holding projection and queue tables
    pub schema: String,
}

/// Where the listener reads notifications from
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The embedded ledger, replaying its notification log
    Ledger,
    /// JetStream, fed by a publisher forwarding the embedded ledger
    Jetstream,
}

/// How the listener applies event records
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Enqueue each record; the event worker applies it
    Queued,
    /// Apply inline; failures go to the error queue
    Direct,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ListenerConfig {
    pub source: SourceKind,
    pub dispatch: DispatchMode,
    /// Replay all history when no checkpoint exists
    pub replay_from_start: bool,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    pub event_queue: String,
    pub event_polling_interval_ms: u64,
    pub error_queue: String,
    pub error_polling_interval_ms: u64,
    pub error_retry_limit: i32,
    pub error_retry_delay_secs: i32,
    /// How long completed jobs are kept before the purge task deletes them
    pub completed_retention_secs: u64,
    pub purge_interval_ms: u64,
}

impl Config {
    fn builder() -> std::result::Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        config::Config::builder()
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.schema", "coinledger")?
            .set_default("listener.source", "ledger")?
            .set_default("listener.dispatch", "queued")?
            .set_default("listener.replay_from_start", false)?
            .set_default("listener.reconnect_delay_ms", 1000)?
            .set_default("queue.event_queue", "ledger-event-queue")?
            .set_default("queue.event_polling_interval_ms", 1000)?
            .set_default("queue.error_queue", "ledger-error-queue")?
            .set_default("queue.error_polling_interval_ms", 1000)?
            .set_default("queue.error_retry_limit", 3)?
            .set_default("queue.error_retry_delay_secs", 5)?
            .set_default("queue.completed_retention_secs", 86400)?
            .set_default("queue.purge_interval_ms", 60000)
    }

    /// Built-in defaults only
    pub fn defaults() -> Result<Self> {
        Ok(Self::builder()?.build()?.try_deserialize()?)
    }

    /// Defaults, then `config/<ENVIRONMENT>` or `CONFIG_FILE`, then `PROJECTOR__*` variables
    pub fn from_env() -> Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = Self::builder()?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("PROJECTOR").separator("__"));

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }

        if let Ok(data_dir) = env::var("LEDGER_DATA_DIR") {
            builder = builder.set_override("ledger.data_dir", data_dir)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(ProjectorError::Config("Database URL is required".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(ProjectorError::Config(
                "database.max_connections must be positive".to_string(),
            ));
        }

        validate_identifier(&self.database.schema)?;

        if self.queue.event_queue.is_empty() || self.queue.error_queue.is_empty() {
            return Err(ProjectorError::Config("Queue names are required".to_string()));
        }

        if self.queue.event_queue == self.queue.error_queue {
            return Err(ProjectorError::Config(
                "Event and error queues must differ".to_string(),
            ));
        }

        if self.queue.error_retry_limit < 0 || self.queue.error_retry_delay_secs < 0 {
            return Err(ProjectorError::Config(
                "Error queue retry settings must not be negative".to_string(),
            ));
        }

        if self.queue.purge_interval_ms == 0 {
            return Err(ProjectorError::Config(
                "queue.purge_interval_ms must be positive".to_string(),
            ));
        }

        if self.listener.source == SourceKind::Jetstream && self.nats.url.is_empty() {
            return Err(ProjectorError::Config("NATS URL is required".to_string()));
        }

        self.ledger.validate()?;

        Ok(())
    }
}

/// Schema names are interpolated into SQL, so only plain identifiers pass
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid_start || !valid_rest || name.len() > 63 {
        return Err(ProjectorError::Config(format!(
            "{:?} is not a valid schema name",
            name
        )));
    }
    Ok(())
}
