//! Actor-based concurrency for the ledger
//!
//! The single-writer pattern using a Tokio actor:
//! - One task executes every transaction, so contract code never races
//! - Each transaction commits its writes and its notification in one batch
//! - Bounded mailbox gives callers backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                   │
//! │        submit / evaluate → actor mailbox             │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)               │
//! │   TxContext → Contract::execute → Envelope::seal     │
//! │                       │                              │
//! │                       ▼                              │
//! │        StateStore::commit (writes + notification)    │
//! │                       │                              │
//! │                       ▼                              │
//! │          broadcast::Sender<Notification>             │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::context::TxContext;
use crate::contract::{Contract, Operation, OperationOutput, Query, QueryOutput};
use crate::envelope::Notification;
use crate::metrics::Metrics;
use crate::store::{CommitBatch, StateStore};
use crate::types::ClientIdentity;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

/// Outcome of a committed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    /// Transaction id
    pub transaction_id: String,
    /// Sequence of the emitted notification, if any records were written
    pub sequence: Option<u64>,
    /// Contract output
    pub output: OperationOutput,
}

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Execute a state-changing operation
    Submit {
        identity: ClientIdentity,
        operation: Operation,
        timestamp: Option<DateTime<Utc>>,
        response: oneshot::Sender<Result<TxReceipt>>,
    },

    /// Run a read-only query against committed state
    Evaluate {
        identity: ClientIdentity,
        query: Query,
        response: oneshot::Sender<Result<QueryOutput>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    store: Arc<dyn StateStore>,
    contract: Contract,
    metrics: Metrics,
    notifications: broadcast::Sender<Notification>,
    mailbox: mpsc::Receiver<LedgerMessage>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        store: Arc<dyn StateStore>,
        contract: Contract,
        metrics: Metrics,
        notifications: broadcast::Sender<Notification>,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            store,
            contract,
            metrics,
            notifications,
            mailbox,
            last_timestamp: None,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Submit {
                    identity,
                    operation,
                    timestamp,
                    response,
                } => {
                    let result = self.submit(&identity, operation, timestamp);
                    let _ = response.send(result);
                }
                LedgerMessage::Evaluate {
                    identity,
                    query,
                    response,
                } => {
                    let result = self.evaluate(&identity, query);
                    let _ = response.send(result);
                }
                LedgerMessage::Shutdown => break,
            }
        }
        tracing::info!("Ledger actor stopped");
    }

    /// Execute one transaction and commit it if the contract succeeds
    fn submit(
        &mut self,
        identity: &ClientIdentity,
        operation: Operation,
        proposed: Option<DateTime<Utc>>,
    ) -> Result<TxReceipt> {
        let started = Instant::now();
        let timestamp = self.next_timestamp(proposed);
        let transaction_id = transaction_id(Uuid::new_v4().as_bytes(), identity, &timestamp);
        let function = operation_name(&operation);

        let mut ctx = TxContext::new(self.store.as_ref(), identity, transaction_id.clone(), timestamp);
        let output = match self.contract.execute(&mut ctx, operation) {
            Ok(output) => output,
            Err(e) => {
                self.metrics.record_failure(e.error_type());
                tracing::warn!(
                    tx_id = %transaction_id,
                    function,
                    caller = %identity.id(),
                    error = %e,
                    "Transaction rejected"
                );
                return Err(e);
            }
        };

        let (writes, envelope) = ctx.into_parts();
        let sequence = self.store.last_sequence()? + 1;
        let notification = envelope.seal(&transaction_id, sequence);
        let event_count = notification.as_ref().map_or(0, |n| n.event_count);

        self.store.commit(&CommitBatch {
            writes,
            notification: notification.clone(),
        })?;
        self.last_timestamp = Some(timestamp);
        self.metrics
            .record_commit(event_count, started.elapsed().as_secs_f64());

        tracing::debug!(
            tx_id = %transaction_id,
            function,
            event_count,
            "Transaction committed"
        );

        let sequence = notification.as_ref().map(|n| n.sequence);
        if let Some(notification) = notification {
            // No subscribers is fine; the notification log keeps it
            let _ = self.notifications.send(notification);
        }

        Ok(TxReceipt {
            transaction_id,
            sequence,
            output,
        })
    }

    fn evaluate(&self, identity: &ClientIdentity, query: Query) -> Result<QueryOutput> {
        let timestamp = self.last_timestamp.unwrap_or_else(Utc::now);
        let ctx = TxContext::new(self.store.as_ref(), identity, String::new(), timestamp);
        self.contract.evaluate(&ctx, query)
    }

    /// Strictly increasing transaction timestamps
    fn next_timestamp(&self, proposed: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let candidate = proposed.unwrap_or_else(Utc::now);
        match self.last_timestamp {
            Some(last) if candidate <= last => last + Duration::microseconds(1),
            _ => candidate,
        }
    }
}

/// Transaction id: hex SHA-256 over nonce, submitter and timestamp
pub fn transaction_id(nonce: &[u8], identity: &ClientIdentity, timestamp: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(identity.msp_id().as_bytes());
    hasher.update(identity.id().as_str().as_bytes());
    hasher.update(timestamp.timestamp_micros().to_be_bytes());
    format!("{:x}", hasher.finalize())
}

fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Initialize => "Initialize",
        Operation::CreateUserAccount => "CreateUserAccount",
        Operation::SetActive { .. } => "SetActive",
        Operation::Mint { .. } => "Mint",
        Operation::Transfer { .. } => "Transfer",
        Operation::TransferFrom { .. } => "TransferFrom",
        Operation::BurnExpired { .. } => "BurnExpired",
        Operation::MintNft { .. } => "MintNFT",
        Operation::TransferNft { .. } => "TransferNFT",
        Operation::BurnNft { .. } => "BurnNFT",
        Operation::MintGovernanceToken { .. } => "MintGovernanceToken",
        Operation::CreateProposal { .. } => "CreateProposal",
        Operation::UpdateProposal { .. } => "UpdateProposal",
        Operation::Vote { .. } => "Vote",
        Operation::CloseProposal { .. } => "CloseProposal",
        Operation::ExecuteProposal { .. } => "ExecuteProposal",
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    /// Submit an operation; `timestamp` is a proposal the actor may bump forward
    pub async fn submit(
        &self,
        identity: ClientIdentity,
        operation: Operation,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<TxReceipt> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::Submit {
                identity,
                operation,
                timestamp,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Evaluate a query
    pub async fn evaluate(&self, identity: ClientIdentity, query: Query) -> Result<QueryOutput> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::Evaluate {
                identity,
                query,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Timestamp of the newest persisted notification
///
/// Event-emitting documents are keyed by transaction timestamp, so a reopened
/// store must keep timestamps increasing past its last committed record.
pub fn last_committed_timestamp(store: &dyn StateStore) -> Result<Option<DateTime<Utc>>> {
    let last = store.last_sequence()?;
    if last == 0 {
        return Ok(None);
    }

    let mut latest = None;
    for notification in store.notifications_after(last - 1, 1)? {
        for record in &notification.events {
            let timestamp = DateTime::parse_from_rfc3339(&record.timestamp)
                .map_err(|e| {
                    Error::Storage(format!(
                        "notification {} has bad timestamp {:?}: {}",
                        notification.sequence, record.timestamp, e
                    ))
                })?
                .with_timezone(&Utc);
            latest = latest.max(Some(timestamp));
        }
    }
    Ok(latest)
}

/// Spawn the ledger actor, resuming timestamps after the store's last commit
pub fn spawn_ledger_actor(
    store: Arc<dyn StateStore>,
    contract: Contract,
    metrics: Metrics,
    notifications: broadcast::Sender<Notification>,
    mailbox_capacity: usize,
) -> Result<LedgerHandle> {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let last_timestamp = last_committed_timestamp(store.as_ref())?;
    let mut actor = LedgerActor::new(store, contract, metrics, notifications, rx);
    actor.last_timestamp = last_timestamp;

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(LedgerHandle::new(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::Config;
    use chrono::TimeZone;

    fn spawn() -> (LedgerHandle, Arc<MemoryStore>, Metrics, broadcast::Receiver<Notification>) {
        spawn_on(Arc::new(MemoryStore::new()))
    }

    fn spawn_on(
        store: Arc<MemoryStore>,
    ) -> (LedgerHandle, Arc<MemoryStore>, Metrics, broadcast::Receiver<Notification>) {
        let metrics = Metrics::new().unwrap();
        let (sender, receiver) = broadcast::channel(16);
        let handle = spawn_ledger_actor(
            store.clone(),
            Contract::new(&Config::default()),
            metrics.clone(),
            sender,
            8,
        )
        .unwrap();
        (handle, store, metrics, receiver)
    }

    fn issuer(id: &str) -> ClientIdentity {
        ClientIdentity::new(id, "IssuerMSP")
    }

    #[test]
    fn test_transaction_id_is_hex_sha256() {
        let ts = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let a = transaction_id(b"n1", &issuer("alice"), &ts);
        let b = transaction_id(b"n2", &issuer("alice"), &ts);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(a, transaction_id(b"n1", &issuer("alice"), &ts));
    }

    #[tokio::test]
    async fn test_submit_commits_and_broadcasts() {
        let (handle, store, metrics, mut notifications) = spawn();

        let receipt = handle
            .submit(issuer("alice"), Operation::CreateUserAccount, None)
            .await
            .unwrap();
        assert_eq!(receipt.sequence, Some(1));

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.sequence, 1);
        assert_eq!(notification.transaction_id, receipt.transaction_id);
        assert_eq!(store.last_sequence().unwrap(), 1);
        assert_eq!(metrics.transactions_committed.get(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_transaction_leaves_no_trace() {
        let (handle, store, metrics, mut notifications) = spawn();

        let err = handle
            .submit(issuer("ghost"), Operation::Mint { amount: 5, days: 0 }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.last_sequence().unwrap(), 0);
        assert!(notifications.try_recv().is_err());
        assert_eq!(
            metrics
                .transactions_failed
                .with_label_values(&["not_found"])
                .get(),
            1
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let (handle, _store, _metrics, mut notifications) = spawn();
        let fixed = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();

        handle
            .submit(issuer("alice"), Operation::CreateUserAccount, Some(fixed))
            .await
            .unwrap();
        handle
            .submit(issuer("bob"), Operation::CreateUserAccount, Some(fixed))
            .await
            .unwrap();

        let first = notifications.recv().await.unwrap();
        let second = notifications.recv().await.unwrap();
        assert_eq!(first.events[0].timestamp, "2022-01-01T00:00:00.000000Z");
        assert_eq!(second.events[0].timestamp, "2022-01-01T00:00:00.000001Z");
        assert_eq!(second.sequence, 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopened_store_keeps_timestamps_increasing() {
        let fixed = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let (handle, store, _metrics, _notifications) = spawn();
        handle
            .submit(issuer("alice"), Operation::CreateUserAccount, Some(fixed))
            .await
            .unwrap();
        handle.shutdown().await.unwrap();
        assert_eq!(last_committed_timestamp(store.as_ref()).unwrap(), Some(fixed));

        let (handle, _store, _metrics, mut notifications) = spawn_on(store);
        handle
            .submit(issuer("bob"), Operation::CreateUserAccount, Some(fixed))
            .await
            .unwrap();

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.sequence, 2);
        assert_eq!(notification.events[0].timestamp, "2022-01-01T00:00:00.000001Z");

        handle.shutdown().await.unwrap();
    }

    #[test]
    fn test_empty_store_has_no_last_timestamp() {
        assert_eq!(last_committed_timestamp(&MemoryStore::new()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (handle, _store, _metrics, _notifications) = spawn();
        handle.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let err = handle
            .evaluate(issuer("alice"), Query::TokenName)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }
}
