//! Projection manager
//!
//! Prepares the schema, queues and handler tables, then runs the listener,
//! both workers and the completed-job purger until shut down.

use crate::config::Config;
use crate::database::Database;
use crate::errors::{ProjectorError, Result};
use crate::fetcher::DocumentFetcher;
use crate::handlers::HandlerRegistry;
use crate::listener::EventListener;
use crate::queue::{JobQueue, QueueOptions};
use crate::worker::{run_worker, EventWorker, ReconcileWorker};
use message_bus::publisher::stopping;
use message_bus::NotificationSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct ProjectionManager {
    db: Arc<Database>,
    queue: Arc<JobQueue>,
    registry: Arc<HandlerRegistry>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ProjectionManager {
    pub async fn start(
        config: &Config,
        db: Arc<Database>,
        source: Arc<dyn NotificationSource>,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Result<Self> {
        db.initialize_schema().await?;

        let registry = Arc::new(HandlerRegistry::new(db.clone()));
        registry.initialize_tables().await?;

        let queues = &config.queue;
        let queue = Arc::new(JobQueue::new(db.clone()));
        queue.initialize().await?;
        queue.create_queue(&QueueOptions::new(&queues.event_queue)).await?;
        queue
            .create_queue(
                &QueueOptions::new(&queues.error_queue)
                    .with_retry(queues.error_retry_limit, queues.error_retry_delay_secs),
            )
            .await?;

        // Jobs left active by a previous process are picked up again
        for name in [&queues.event_queue, &queues.error_queue] {
            queue.reset_active(name).await?;
        }

        let listener = EventListener::new(
            db.clone(),
            source,
            registry.clone(),
            queue.clone(),
            config.listener.clone(),
            queues,
        );
        listener.initialize().await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let rx = shutdown_rx.clone();
        tasks.push(("listener", tokio::spawn(async move { listener.run(rx).await })));

        let event_worker = Arc::new(EventWorker::new(
            queue.clone(),
            registry.clone(),
            &queues.event_queue,
            &queues.error_queue,
        ));
        tasks.push((
            "event-worker",
            tokio::spawn(run_worker(
                event_worker,
                queue.clone(),
                Duration::from_millis(queues.event_polling_interval_ms),
                shutdown_rx.clone(),
            )),
        ));

        let reconcile_worker = Arc::new(ReconcileWorker::new(
            queue.clone(),
            registry.clone(),
            fetcher,
            &queues.error_queue,
        ));
        tasks.push((
            "reconcile-worker",
            tokio::spawn(run_worker(
                reconcile_worker,
                queue.clone(),
                Duration::from_millis(queues.error_polling_interval_ms),
                shutdown_rx.clone(),
            )),
        ));

        tasks.push((
            "purger",
            tokio::spawn(run_purger(
                queue.clone(),
                vec![queues.event_queue.clone(), queues.error_queue.clone()],
                Duration::from_secs(queues.completed_retention_secs),
                Duration::from_millis(queues.purge_interval_ms),
                shutdown_rx,
            )),
        ));

        info!(
            schema = db.schema(),
            event_types = ?registry.event_types(),
            "Projection manager started"
        );

        Ok(Self {
            db,
            queue,
            registry,
            shutdown,
            tasks,
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Stop the listener and workers, waiting for in-flight work
    pub async fn shutdown(self) -> Result<()> {
        info!("Stopping projection manager");
        let _ = self.shutdown.send(true);

        let mut panicked = Vec::new();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "Projection task panicked");
                panicked.push(name);
            }
        }

        if !panicked.is_empty() {
            return Err(ProjectorError::EventProcessing(format!(
                "tasks panicked: {}",
                panicked.join(", ")
            )));
        }
        info!("Projection manager stopped");
        Ok(())
    }
}

/// Delete completed jobs past their retention, once per `interval`
async fn run_purger(
    queue: Arc<JobQueue>,
    names: Vec<String>,
    retention: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !stopping(&shutdown) {
        for name in &names {
            if let Err(e) = queue.purge_completed(name, retention).await {
                error!(queue = %name, error = %e, "Failed to purge completed jobs");
            }
        }

        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
