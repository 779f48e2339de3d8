//! PostgreSQL projection of the coin ledger
//!
//! Listens to ledger notifications and maintains queryable tables for user
//! accounts, coin transfers and NFTs:
//! - Event handlers per document type, idempotent on replay
//! - A durable job queue in PostgreSQL with retries and dead letters
//! - Reconciliation that rewrites rows from the authoritative ledger state
//! - A persisted listener checkpoint for exact resumption

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod database;
pub mod errors;
pub mod fetcher;
pub mod handlers;
pub mod keys;
pub mod listener;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod worker;

pub use config::{Config, DatabaseConfig, DispatchMode, ListenerConfig, QueueConfig, SourceKind};
pub use database::{Database, Page, TimeRange, TransferDirection};
pub use errors::{ProjectorError, Result};
pub use fetcher::DocumentFetcher;
pub use handlers::{EventHandler, HandlerRegistry, JobData};
pub use listener::EventListener;
pub use manager::ProjectionManager;
pub use queue::{FollowUp, Job, JobQueue, JobState, QueueOptions};
pub use worker::{ErrorJobData, EventWorker, ReconcileWorker};
