//! Notification transport for the coin ledger
//!
//! Delivers ledger notifications to consumers with:
//! - A [`NotificationSource`] abstraction with resumable cursors
//! - In-process delivery straight from the ledger, replaying its notification log
//! - JetStream for persistence and delivery across processes
//! - Retry logic with exponential backoff on publish
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod error;
pub mod jetstream;
pub mod metrics;
pub mod publisher;
pub mod source;

pub use client::{NatsClient, NatsConfig};
pub use error::{Error, Result};
pub use jetstream::JetStreamSource;
pub use publisher::{NotificationPublisher, PublisherConfig};
pub use source::{LedgerSource, NotificationSource, NotificationStream, SourcedNotification};
