//! Projection tests against a live PostgreSQL
//!
//! Run with `DATABASE_URL=postgres://... cargo test -p projector -- --ignored`.
//! Every test works in its own schema and drops it afterwards.

use chrono::{Duration as ChronoDuration, Utc};
use ledger_core::{ClientIdentity, Config as LedgerConfig, EventRecord, Ledger, Notification, Operation};
use message_bus::LedgerSource;
use projector::config::DatabaseConfig;
use projector::database::{Page, TimeRange, TransferDirection};
use projector::handlers::{UserInfoHandler, UserRow};
use projector::worker::JobProcessor;
use projector::{
    Config, Database, ErrorJobData, EventWorker, FollowUp, HandlerRegistry, JobData, JobQueue,
    JobState, ProjectionManager, QueueOptions,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn test_db() -> Arc<Database> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = Database::new(&DatabaseConfig {
        url,
        max_connections: 4,
        min_connections: 0,
        schema: format!("t_{}", Uuid::new_v4().simple()),
    })
    .await
    .expect("Failed to connect");
    db.initialize_schema().await.unwrap();
    Arc::new(db)
}

async fn drop_schema(db: &Database) {
    sqlx::query(&format!("DROP SCHEMA {} CASCADE", db.schema()))
        .execute(db.pool())
        .await
        .unwrap();
}

fn issuer(id: &str) -> ClientIdentity {
    ClientIdentity::new(id, "IssuerMSP")
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Notification>) -> Vec<EventRecord> {
    let mut records = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        records.extend(notification.events);
    }
    records
}

async fn apply_all(registry: &HandlerRegistry, records: &[EventRecord]) {
    for record in records {
        if registry.get(&record.event_type).is_some() {
            registry.handle_job(&JobData::from_record(record)).await.unwrap();
        }
    }
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_queue_lifecycle() {
    let db = test_db().await;
    let queue = JobQueue::new(db.clone());
    queue.initialize().await.unwrap();
    queue.create_queue(&QueueOptions::new("events")).await.unwrap();
    queue
        .create_queue(&QueueOptions::new("errors").with_retry(1, 0))
        .await
        .unwrap();

    assert!(queue.send("events", "a", &json!({"n": 1})).await.unwrap());
    assert!(!queue.send("events", "a", &json!({"n": 2})).await.unwrap());

    let job = queue.fetch("events").await.unwrap().unwrap();
    assert_eq!(job.id, "a");
    assert_eq!(job.state, JobState::Active);
    assert_eq!(job.data, json!({"n": 1}));
    assert!(queue.fetch("events").await.unwrap().is_none());

    queue.complete("events", "a").await.unwrap();
    let job = queue.get("events", "a").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);

    // One retry, then a dead letter
    queue.send("errors", "e1", &json!({})).await.unwrap();
    queue.fetch("errors").await.unwrap().unwrap();
    assert_eq!(queue.fail("errors", "e1", "boom").await.unwrap(), JobState::Retry);
    let retried = queue.fetch("errors").await.unwrap().unwrap();
    assert_eq!(retried.retry_count, 1);
    assert_eq!(queue.fail("errors", "e1", "boom").await.unwrap(), JobState::Failed);

    let failed = queue.list_failed("errors", 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].output, Some(json!({"error": "boom"})));
    assert_eq!(queue.count("errors", JobState::Failed).await.unwrap(), 1);

    assert!(queue.requeue("errors", "e1").await.unwrap());
    assert!(!queue.requeue("errors", "e1").await.unwrap());
    let requeued = queue.fetch("errors").await.unwrap().unwrap();
    assert_eq!(requeued.retry_count, 0);

    // A crash leaves the job active; startup puts it back
    assert_eq!(queue.reset_active("errors").await.unwrap(), 1);
    assert_eq!(queue.fetch("errors").await.unwrap().unwrap().id, "e1");

    drop_schema(&db).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_failed_event_job_lands_in_error_queue() {
    let db = test_db().await;
    let queue = Arc::new(JobQueue::new(db.clone()));
    queue.initialize().await.unwrap();
    queue.create_queue(&QueueOptions::new("events")).await.unwrap();
    queue
        .create_queue(&QueueOptions::new("errors").with_retry(3, 0))
        .await
        .unwrap();
    let registry = Arc::new(HandlerRegistry::new(db.clone()));

    let data = JobData {
        id: "tx-1".to_string(),
        event_type: "proposal".to_string(),
        document_key: "{u0000}proposal{u0000}p1{u0000}".to_string(),
        payload: json!({}),
    };
    queue
        .send("events", "tx-1", &serde_json::to_value(&data).unwrap())
        .await
        .unwrap();

    let worker = EventWorker::new(queue.clone(), registry, "events", "errors");
    let job = queue.fetch("events").await.unwrap().unwrap();
    worker.process(&job).await.unwrap();

    assert_eq!(
        queue.get("events", "tx-1").await.unwrap().unwrap().state,
        JobState::Failed
    );
    let error_job = queue.fetch("errors").await.unwrap().unwrap();
    let error_data: ErrorJobData = serde_json::from_value(error_job.data).unwrap();
    assert_eq!(error_data.original_job, data);

    drop_schema(&db).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_fail_and_send_is_all_or_nothing() {
    let db = test_db().await;
    let queue = JobQueue::new(db.clone());
    queue.initialize().await.unwrap();
    queue.create_queue(&QueueOptions::new("events")).await.unwrap();
    queue.create_queue(&QueueOptions::new("errors")).await.unwrap();

    // The failed job does not exist, so the follow-up insert is rolled back
    let follow_up = FollowUp {
        queue: "errors",
        id: "e1",
        data: &json!({}),
    };
    assert!(queue
        .fail_and_send("events", "missing", "boom", &follow_up)
        .await
        .is_err());
    assert!(queue.get("errors", "e1").await.unwrap().is_none());

    queue.send("events", "a", &json!({})).await.unwrap();
    queue.fetch("events").await.unwrap().unwrap();
    let state = queue
        .fail_and_send("events", "a", "boom", &follow_up)
        .await
        .unwrap();
    assert_eq!(state, JobState::Failed);
    assert_eq!(
        queue.get("errors", "e1").await.unwrap().unwrap().state,
        JobState::Created
    );

    drop_schema(&db).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_release_returns_active_job() {
    let db = test_db().await;
    let queue = JobQueue::new(db.clone());
    queue.initialize().await.unwrap();
    queue.create_queue(&QueueOptions::new("events")).await.unwrap();

    queue.send("events", "a", &json!({})).await.unwrap();
    queue.fetch("events").await.unwrap().unwrap();
    assert!(queue.release("events", "a").await.unwrap());
    assert!(!queue.release("events", "a").await.unwrap());

    let job = queue.fetch("events").await.unwrap().unwrap();
    assert_eq!(job.id, "a");
    assert_eq!(job.retry_count, 0);

    drop_schema(&db).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_purge_completed_respects_retention() {
    let db = test_db().await;
    let queue = JobQueue::new(db.clone());
    queue.initialize().await.unwrap();
    queue.create_queue(&QueueOptions::new("events")).await.unwrap();

    for id in ["a", "b"] {
        queue.send("events", id, &json!({})).await.unwrap();
    }
    queue.fetch("events").await.unwrap().unwrap();
    queue.complete("events", "a").await.unwrap();

    // Within retention nothing goes
    let purged = queue
        .purge_completed("events", Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(purged, 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let purged = queue
        .purge_completed("events", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(queue.get("events", "a").await.unwrap().is_none());
    assert_eq!(queue.count("events", JobState::Completed).await.unwrap(), 0);

    // Unfinished jobs are kept
    assert_eq!(queue.get("events", "b").await.unwrap().unwrap().state, JobState::Created);

    drop_schema(&db).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_replayed_and_stale_events_do_not_regress_rows() {
    let db = test_db().await;
    let registry = HandlerRegistry::new(db.clone());
    registry.initialize_tables().await.unwrap();

    let ledger = Ledger::in_memory(LedgerConfig::default()).unwrap();
    let mut rx = ledger.subscribe();
    ledger.create_user_account(&issuer("alice")).await.unwrap();
    ledger.mint(&issuer("alice"), 100, 30).await.unwrap();
    let records = drain(&mut rx);

    apply_all(&registry, &records).await;
    apply_all(&registry, &records).await;

    let balances = db.balance_of(&["alice".to_string()]).await.unwrap();
    assert_eq!(balances.get("alice"), Some(&100));

    // The account snapshot from before the mint arrives late
    let stale = records
        .iter()
        .find(|r| r.event_type == "user-info" && r.payload["balance"] == json!(0))
        .unwrap();
    let handler = UserInfoHandler::new(db.clone());
    handler.upsert(&UserRow::from_payload(&stale.payload).unwrap()).await.unwrap();

    let balances = db.balance_of(&["alice".to_string()]).await.unwrap();
    assert_eq!(balances.get("alice"), Some(&100));

    drop_schema(&db).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_read_helpers() {
    let db = test_db().await;
    let registry = HandlerRegistry::new(db.clone());
    registry.initialize_tables().await.unwrap();

    let ledger = Ledger::in_memory(LedgerConfig::default()).unwrap();
    let mut rx = ledger.subscribe();
    ledger.create_user_account(&issuer("alice")).await.unwrap();
    ledger.create_user_account(&issuer("bob")).await.unwrap();
    ledger.mint(&issuer("alice"), 100, 30).await.unwrap();
    ledger.transfer(&issuer("alice"), &"bob".into(), 40).await.unwrap();
    ledger
        .submit(&issuer("bob"), Operation::SetActive { active: true })
        .await
        .unwrap();
    ledger.mint(&issuer("bob"), 25, 30).await.unwrap();
    ledger.transfer(&issuer("bob"), &"alice".into(), 5).await.unwrap();
    let nft = ledger
        .mint_nft(&issuer("alice"), r#"{"name":"Badge","price":"12.50"}"#)
        .await
        .unwrap();
    ledger
        .transfer_nft(&issuer("alice"), None, &"bob".into(), &nft.id)
        .await
        .unwrap();
    apply_all(&registry, &drain(&mut rx)).await;

    let balances = db
        .balance_of(&["alice".to_string(), "bob".to_string()])
        .await
        .unwrap();
    assert_eq!(balances.get("alice"), Some(&65));
    assert_eq!(balances.get("bob"), Some(&60));

    // Bob is the only active account
    assert_eq!(db.total_balance_by_status(true).await.unwrap(), 60);
    assert_eq!(db.total_balance_by_status(false).await.unwrap(), 65);

    assert_eq!(db.total_supply(TimeRange::default(), false).await.unwrap(), 125);
    assert_eq!(db.total_supply(TimeRange::default(), true).await.unwrap(), 25);

    let around = TimeRange::new(
        Some(Utc::now() - ChronoDuration::days(1)),
        Some(Utc::now() + ChronoDuration::days(1)),
    );
    assert_eq!(db.total_supply(around, false).await.unwrap(), 125);
    let later = TimeRange::new(Some(Utc::now() + ChronoDuration::days(1)), None);
    assert_eq!(db.total_supply(later, false).await.unwrap(), 0);
    let earlier = TimeRange::new(None, Some(Utc::now() - ChronoDuration::days(1)));
    assert_eq!(db.total_supply(earlier, true).await.unwrap(), 0);

    // Minted to active accounts, and spent by them
    let summary = db.user_summary(TimeRange::default()).await.unwrap();
    assert_eq!(summary.received_from_system, 25);
    assert_eq!(summary.spent_to_others, 5);
    let summary = db.user_summary(later).await.unwrap();
    assert_eq!(summary.received_from_system, 0);
    assert_eq!(summary.spent_to_others, 0);

    let spent = db
        .transfer_events("alice", TimeRange::default(), Some(TransferDirection::Spend), None)
        .await
        .unwrap();
    assert_eq!(spent.len(), 1);
    assert_eq!(spent[0].amount, 40);
    assert_eq!(spent[0].direction, "spend");

    let all = db
        .transfer_events_count("alice", TimeRange::default(), None)
        .await
        .unwrap();
    let page = db
        .transfer_events("alice", TimeRange::default(), None, Some(Page { size: 1, skip: 0 }))
        .await
        .unwrap();
    assert!(all >= 2);
    assert_eq!(page.len(), 1);

    let history = db.nft_with_history(&nft.id).await.unwrap().unwrap();
    assert_eq!(history.current_owner, "bob");
    assert_eq!(history.transaction_history.len(), 1);
    assert_eq!(db.nfts_by_owner("bob").await.unwrap().len(), 1);
    assert!(db.nft_with_history("nft_missing").await.unwrap().is_none());

    drop_schema(&db).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_manager_projects_live_ledger() {
    let db = test_db().await;
    let mut config = Config::defaults().unwrap();
    config.database.schema = db.schema().to_string();
    config.listener.replay_from_start = true;
    config.queue.event_polling_interval_ms = 50;
    config.queue.error_polling_interval_ms = 50;

    let ledger = Ledger::in_memory(LedgerConfig::default()).unwrap();
    ledger.create_user_account(&issuer("alice")).await.unwrap();

    let manager = ProjectionManager::start(
        &config,
        db.clone(),
        Arc::new(LedgerSource::new(ledger.clone())),
        Arc::new(ledger.clone()),
    )
    .await
    .unwrap();

    ledger.mint(&issuer("alice"), 75, 10).await.unwrap();

    let mut projected = None;
    for _ in 0..100 {
        let balances = db.balance_of(&["alice".to_string()]).await.unwrap();
        if balances.get("alice") == Some(&75) {
            projected = Some(75);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(projected, Some(75));

    let queue = manager.queue().clone();
    manager.shutdown().await.unwrap();
    assert_eq!(
        queue
            .count(&config.queue.event_queue, JobState::Failed)
            .await
            .unwrap(),
        0
    );

    drop_schema(&db).await;
}
