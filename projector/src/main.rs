//! Projector service
//!
//! Opens the ledger, connects to PostgreSQL and keeps the projection current
//! until interrupted.

use anyhow::Context;
use ledger_core::Ledger;
use message_bus::{JetStreamSource, LedgerSource, NatsClient, NotificationPublisher, NotificationSource};
use projector::{Config, Database, ProjectionManager, SourceKind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        source = ?config.listener.source,
        dispatch = ?config.listener.dispatch,
        schema = %config.database.schema,
        "Starting projector"
    );

    let ledger = Ledger::open(config.ledger.clone())
        .await
        .context("Failed to open ledger")?;
    let db = Arc::new(
        Database::new(&config.database)
            .await
            .context("Failed to connect to database")?,
    );

    let (forward_shutdown, forward_rx) = watch::channel(false);
    let mut forwarder = None;
    let source: Arc<dyn NotificationSource> = match config.listener.source {
        SourceKind::Ledger => Arc::new(LedgerSource::new(ledger.clone())),
        SourceKind::Jetstream => {
            let client = Arc::new(
                NatsClient::connect(config.nats.clone())
                    .await
                    .context("Failed to connect to NATS")?,
            );
            client.ensure_stream().await.context("Failed to prepare stream")?;

            // Forwarding starts at the ledger head unless replaying everything
            let resume_after = config.listener.replay_from_start.then_some(0);
            let publisher = NotificationPublisher::new(client.clone(), config.publisher.clone());
            let ledger_source = LedgerSource::new(ledger.clone());
            forwarder = Some(tokio::spawn(async move {
                publisher.forward(&ledger_source, resume_after, forward_rx).await
            }));

            Arc::new(JetStreamSource::new(client))
        }
    };

    let manager = ProjectionManager::start(&config, db, source, Arc::new(ledger.clone()))
        .await
        .context("Failed to start projection")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    manager.shutdown().await?;

    let _ = forward_shutdown.send(true);
    if let Some(forwarder) = forwarder {
        match forwarder.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Notification forwarder failed"),
            Err(e) => error!(error = %e, "Notification forwarder panicked"),
        }
    }

    ledger.shutdown().await.context("Failed to close ledger")?;
    info!("Projector stopped");
    Ok(())
}
