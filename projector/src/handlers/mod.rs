//! Event handlers
//!
//! One handler per projected event type. Live records, queued jobs and
//! reconciled ledger documents all reach the same `handle_job_event`, so
//! the three paths write identical rows.

mod nft;
mod nft_transfer;
mod transfer;
mod user;

pub use nft::{NftHandler, NftRow, NFT_TABLE};
pub use nft_transfer::{NftTransferHandler, NftTransferRow, NFT_TRANSFER_TABLE};
pub use transfer::{CoinTransferHandler, TransferRow, TRANSFER_TABLE};
pub use user::{UserInfoHandler, UserRow, USER_TABLE};

use crate::database::Database;
use crate::errors::{ProjectorError, Result};
use crate::keys::encode_document_key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{Document, EventRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Queued form of an event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    /// Record id (`<txId>-<index>`)
    pub id: String,
    pub event_type: String,
    /// Ledger key with NUL escaped
    pub document_key: String,
    /// Full document JSON
    pub payload: Value,
}

impl JobData {
    pub fn from_record(record: &EventRecord) -> Self {
        Self {
            id: record.id.clone(),
            event_type: record.event_type.clone(),
            document_key: encode_document_key(&record.key),
            payload: record.payload.clone(),
        }
    }

    /// Job equivalent to the record that last wrote `document`
    pub fn from_document(document: &Document) -> Result<Self> {
        let document_key = encode_document_key(&document.key());
        Ok(Self {
            id: document_key.clone(),
            event_type: document.doc_type().as_str().to_string(),
            document_key,
            payload: document.to_value()?,
        })
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> &'static str;

    /// Idempotent DDL for the handler's table
    async fn initialize_tables(&self) -> Result<()>;

    fn validate_payload(&self, record: &EventRecord) -> bool {
        !record.id.is_empty() && record.event_type == self.event_type()
    }

    async fn handle_contract_event(&self, record: &EventRecord) -> Result<()> {
        self.handle_job_event(&JobData::from_record(record)).await
    }

    async fn handle_job_event(&self, job: &JobData) -> Result<()>;

    /// Rewrite the row from the authoritative ledger document
    async fn sync_document(&self, document: &Document) -> Result<()> {
        if document.doc_type().as_str() != self.event_type() {
            return Err(ProjectorError::invalid_payload(
                self.event_type(),
                format!("cannot sync a {} document", document.doc_type()),
            ));
        }
        self.handle_job_event(&JobData::from_document(document)?).await
    }
}

/// Handlers keyed by event type
pub struct HandlerRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// The four projection handlers
    pub fn new(db: Arc<Database>) -> Self {
        Self::from_handlers(vec![
            Arc::new(UserInfoHandler::new(db.clone())),
            Arc::new(CoinTransferHandler::new(db.clone())),
            Arc::new(NftHandler::new(db.clone())),
            Arc::new(NftTransferHandler::new(db)),
        ])
    }

    pub fn from_handlers(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self {
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.event_type(), handler))
                .collect(),
        }
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub async fn initialize_tables(&self) -> Result<()> {
        for handler in self.handlers.values() {
            handler.initialize_tables().await?;
        }
        info!(handlers = ?self.event_types(), "Projection tables initialized");
        Ok(())
    }

    /// Route a queued job to its handler
    pub async fn handle_job(&self, job: &JobData) -> Result<()> {
        let handler = self
            .get(&job.event_type)
            .ok_or_else(|| ProjectorError::UnknownEventType(job.event_type.clone()))?;
        handler.handle_job_event(job).await
    }
}

/// Decode a payload into its ledger document
pub(crate) fn decode_payload(event_type: &str, payload: &Value) -> Result<Document> {
    Document::from_value(payload.clone())
        .map_err(|e| ProjectorError::invalid_payload(event_type, e.to_string()))
}

pub(crate) fn parse_timestamp(event_type: &str, timestamp: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            ProjectorError::invalid_payload(event_type, format!("bad timestamp {:?}: {}", timestamp, e))
        })
}

pub(crate) fn to_bigint(event_type: &str, field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        ProjectorError::invalid_payload(event_type, format!("{} {} out of range", field, value))
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::keys::decode_document_key;

    fn lazy_db() -> Arc<Database> {
        Arc::new(
            Database::connect_lazy(&DatabaseConfig {
                url: "postgres://localhost/coinledger".to_string(),
                max_connections: 1,
                min_connections: 0,
                schema: "coinledger".to_string(),
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_registry_has_four_handlers() {
        let registry = HandlerRegistry::new(lazy_db());
        assert_eq!(
            registry.event_types(),
            vec!["coin-transfer-event", "nft", "nft-transfer-event", "user-info"]
        );
        assert!(registry.get("proposal").is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_rejected() {
        let registry = HandlerRegistry::new(lazy_db());
        let job = JobData {
            id: "tx-0".to_string(),
            event_type: "proposal".to_string(),
            document_key: "{u0000}proposal{u0000}p1{u0000}".to_string(),
            payload: Value::Null,
        };
        assert!(matches!(
            registry.handle_job(&job).await,
            Err(ProjectorError::UnknownEventType(t)) if t == "proposal"
        ));
    }

    #[tokio::test]
    async fn test_job_from_record_escapes_key() {
        let (_ledger, notifications) = populated_ledger().await;
        let record = &records_of(&notifications, "coin-transfer-event")[0];
        let job = JobData::from_record(record);

        assert_eq!(job.id, record.id);
        assert!(!job.document_key.contains('\u{0}'));
        assert_eq!(decode_document_key(&job.document_key), record.key);
        assert_eq!(job.payload, record.payload);
    }

    #[tokio::test]
    async fn test_job_from_document_matches_record() {
        let (ledger, notifications) = populated_ledger().await;
        let record = &records_of(&notifications, "coin-transfer-event")[0];
        let document = ledger.get_document(&record.key).unwrap().unwrap();

        let from_record = JobData::from_record(record);
        let from_document = JobData::from_document(&document).unwrap();
        assert_eq!(from_document.event_type, from_record.event_type);
        assert_eq!(from_document.document_key, from_record.document_key);
        assert_eq!(from_document.payload, from_record.payload);
    }

    #[test]
    fn test_job_data_wire_shape() {
        let job = JobData {
            id: "tx-1".to_string(),
            event_type: "user-info".to_string(),
            document_key: "{u0000}user-info{u0000}alice{u0000}".to_string(),
            payload: serde_json::json!({"docType": "user-info"}),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["eventType"], "user-info");
        assert_eq!(value["documentKey"], "{u0000}user-info{u0000}alice{u0000}");
    }
}
