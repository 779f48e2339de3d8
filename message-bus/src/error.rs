//! Error types for message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Stream could not be created or looked up
    #[error("Stream error: {0}")]
    Stream(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A live subscriber fell behind and missed notifications
    #[error("Subscriber lagged, {0} notifications skipped")]
    Lagged(u64),

    /// Ledger error while replaying the notification log
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// NATS error
    #[error("NATS error: {0}")]
    Nats(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
