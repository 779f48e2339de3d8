//! Ledger event listener
//!
//! Subscribes to a notification source and routes every event record to its
//! handler, either through the event queue or applied inline. The cursor of
//! each fully dispatched notification is checkpointed so a restart resumes
//! right after it.

use crate::config::{DispatchMode, ListenerConfig, QueueConfig};
use crate::database::Database;
use crate::errors::{ProjectorError, Result};
use crate::handlers::{HandlerRegistry, JobData};
use crate::metrics::{PROJECTOR_EVENTS_TOTAL, PROJECTOR_LISTENER_CURSOR, PROJECTOR_SUBSCRIPTIONS_TOTAL};
use crate::queue::JobQueue;
use crate::worker::enqueue_error_job;
use futures::StreamExt;
use ledger_core::{EventRecord, Notification};
use message_bus::publisher::stopping;
use message_bus::{NotificationSource, SourcedNotification};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const CHECKPOINT_TABLE: &str = "listener_checkpoint";

/// Where a subscription starts
///
/// A stored checkpoint always wins. Without one the listener either replays
/// the whole history or starts with what is committed from now on.
pub fn resume_point(checkpoint: Option<u64>, replay_from_start: bool) -> Option<u64> {
    checkpoint.or(replay_from_start.then_some(0))
}

pub struct EventListener {
    db: Arc<Database>,
    source: Arc<dyn NotificationSource>,
    registry: Arc<HandlerRegistry>,
    queue: Arc<JobQueue>,
    config: ListenerConfig,
    event_queue: String,
    error_queue: String,
}

impl EventListener {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn NotificationSource>,
        registry: Arc<HandlerRegistry>,
        queue: Arc<JobQueue>,
        config: ListenerConfig,
        queues: &QueueConfig,
    ) -> Self {
        Self {
            db,
            source,
            registry,
            queue,
            config,
            event_queue: queues.event_queue.clone(),
            error_queue: queues.error_queue.clone(),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                source TEXT PRIMARY KEY,
                cursor BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            self.db.table(CHECKPOINT_TABLE)
        ))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Last checkpointed cursor of this listener's source
    pub async fn checkpoint(&self) -> Result<Option<u64>> {
        let cursor: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT cursor FROM {} WHERE source = $1",
            self.db.table(CHECKPOINT_TABLE)
        ))
        .bind(self.source.name())
        .fetch_optional(self.db.pool())
        .await?;

        cursor
            .map(|c| {
                u64::try_from(c).map_err(|_| ProjectorError::EventProcessing(format!("negative checkpoint {}", c)))
            })
            .transpose()
    }

    async fn save_checkpoint(&self, cursor: u64) -> Result<()> {
        let value = i64::try_from(cursor)
            .map_err(|_| ProjectorError::EventProcessing(format!("cursor {} out of range", cursor)))?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (source, cursor, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (source) DO UPDATE SET cursor = EXCLUDED.cursor, updated_at = now()
            "#,
            self.db.table(CHECKPOINT_TABLE)
        ))
        .bind(self.source.name())
        .bind(value)
        .execute(self.db.pool())
        .await?;

        PROJECTOR_LISTENER_CURSOR
            .with_label_values(&[self.source.name()])
            .set(value);
        Ok(())
    }

    /// Listen until `shutdown` flips, resubscribing after failures
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = self.source.name(),
            dispatch = ?self.config.dispatch,
            "Event listener started"
        );

        while !stopping(&shutdown) {
            if let Err(e) = self.listen(&mut shutdown).await {
                error!(source = self.source.name(), error = %e, "Listener failed, resubscribing");
            }
            self.pause(&mut shutdown).await;
        }

        info!(source = self.source.name(), "Event listener stopped");
    }

    async fn listen(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let resume_after = resume_point(self.checkpoint().await?, self.config.replay_from_start);
        let mut stream = self.source.subscribe(resume_after).await?;
        PROJECTOR_SUBSCRIPTIONS_TOTAL
            .with_label_values(&[self.source.name()])
            .inc();
        info!(source = self.source.name(), resume_after = ?resume_after, "Subscribed to notifications");

        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(sourced)) => self.process(&sourced).await?,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    warn!(source = self.source.name(), "Notification stream ended");
                    return Ok(());
                }
            }
        }
    }

    async fn process(&self, sourced: &SourcedNotification) -> Result<()> {
        self.dispatch(&sourced.notification).await?;
        self.save_checkpoint(sourced.cursor).await
    }

    /// Route every record of `notification` to its handler
    pub async fn dispatch(&self, notification: &Notification) -> Result<()> {
        debug!(
            sequence = notification.sequence,
            transaction_id = %notification.transaction_id,
            records = notification.events.len(),
            "Dispatching notification"
        );
        for record in &notification.events {
            self.dispatch_record(record).await?;
        }
        Ok(())
    }

    async fn dispatch_record(&self, record: &EventRecord) -> Result<()> {
        let Some(handler) = self.registry.get(&record.event_type) else {
            debug!(event_type = %record.event_type, id = %record.id, "No handler for event type, skipping");
            self.count(record, "skipped");
            return Ok(());
        };

        if !handler.validate_payload(record) {
            error!(event_type = %record.event_type, id = %record.id, "Invalid event payload, skipping");
            self.count(record, "invalid");
            return Ok(());
        }

        match self.config.dispatch {
            DispatchMode::Queued => {
                let job = serde_json::to_value(JobData::from_record(record))?;
                let inserted = self.queue.send(&self.event_queue, &record.id, &job).await?;
                if !inserted {
                    debug!(id = %record.id, "Event job already queued");
                }
                self.count(record, if inserted { "queued" } else { "duplicate" });
            }
            DispatchMode::Direct => match handler.handle_contract_event(record).await {
                Ok(()) => self.count(record, "applied"),
                Err(e) => {
                    error!(
                        event_type = %record.event_type,
                        id = %record.id,
                        error = %e,
                        "Failed to apply event, scheduling reconciliation"
                    );
                    enqueue_error_job(&self.queue, &self.error_queue, JobData::from_record(record), &e).await?;
                    self.count(record, "failed");
                }
            },
        }
        Ok(())
    }

    fn count(&self, record: &EventRecord, outcome: &str) {
        PROJECTOR_EVENTS_TOTAL
            .with_label_values(&[&record.event_type, outcome])
            .inc();
    }

    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) {
        if stopping(shutdown) {
            return;
        }
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
