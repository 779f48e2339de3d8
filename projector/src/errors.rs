use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProjectorError>;

#[derive(Error, Debug)]
pub enum ProjectorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid {event_type} payload: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    #[error("No handler for event type: {0}")]
    UnknownEventType(String),

    #[error("Event processing failed: {0}")]
    EventProcessing(String),

    #[error("Reconciliation failed for {key}: {reason}")]
    Reconciliation { key: String, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for ProjectorError {
    fn from(err: config::ConfigError) -> Self {
        ProjectorError::Config(err.to_string())
    }
}

impl ProjectorError {
    pub fn invalid_payload(event_type: &str, reason: impl Into<String>) -> Self {
        ProjectorError::InvalidPayload {
            event_type: event_type.to_string(),
            reason: reason.into(),
        }
    }

    /// Label used in logs and metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            ProjectorError::Database(_) => "database_error",
            ProjectorError::Serialization(_) => "serialization_error",
            ProjectorError::InvalidPayload { .. } => "invalid_payload",
            ProjectorError::UnknownEventType(_) => "unknown_event_type",
            ProjectorError::EventProcessing(_) => "event_processing",
            ProjectorError::Reconciliation { .. } => "reconciliation",
            ProjectorError::Ledger(_) => "ledger_error",
            ProjectorError::Bus(_) => "messaging_error",
            ProjectorError::Config(_) => "config_error",
        }
    }
}
