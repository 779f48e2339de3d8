use super::{decode_payload, parse_timestamp, EventHandler, JobData};
use crate::database::Database;
use crate::errors::{ProjectorError, Result};
use crate::keys::encode_document_key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{EventRecord, LedgerDocument, NftTransferEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub const NFT_TRANSFER_EVENT_TYPE: &str = "nft-transfer-event";
pub const NFT_TRANSFER_TABLE: &str = "nft_transfer";

/// `nft_transfer` row, keyed by the escaped ledger key
#[derive(Debug, Clone, PartialEq)]
pub struct NftTransferRow {
    pub txid: String,
    pub from_user: String,
    pub to_user: String,
    pub nft_id: String,
    pub event_timestamp: DateTime<Utc>,
}

impl NftTransferRow {
    pub fn from_payload(document_key: &str, payload: &Value) -> Result<Self> {
        let event = NftTransferEvent::from_document(decode_payload(NFT_TRANSFER_EVENT_TYPE, payload)?)
            .map_err(|e| ProjectorError::invalid_payload(NFT_TRANSFER_EVENT_TYPE, e.to_string()))?;

        Ok(Self {
            txid: document_key.to_string(),
            from_user: event.from.to_string(),
            to_user: event.to.to_string(),
            nft_id: event.nft_id,
            event_timestamp: parse_timestamp(NFT_TRANSFER_EVENT_TYPE, &event.timestamp)?,
        })
    }
}

pub struct NftTransferHandler {
    db: Arc<Database>,
}

impl NftTransferHandler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn upsert(&self, row: &NftTransferRow) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (txid, from_user, to_user, nft_id, event_timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (txid) DO UPDATE SET
                from_user = EXCLUDED.from_user,
                to_user = EXCLUDED.to_user,
                nft_id = EXCLUDED.nft_id,
                event_timestamp = EXCLUDED.event_timestamp
            "#,
            self.db.table(NFT_TRANSFER_TABLE)
        ))
        .bind(&row.txid)
        .bind(&row.from_user)
        .bind(&row.to_user)
        .bind(&row.nft_id)
        .bind(row.event_timestamp)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventHandler for NftTransferHandler {
    fn event_type(&self) -> &'static str {
        NFT_TRANSFER_EVENT_TYPE
    }

    async fn initialize_tables(&self) -> Result<()> {
        let table = self.db.table(NFT_TRANSFER_TABLE);
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                txid TEXT PRIMARY KEY,
                from_user TEXT NOT NULL,
                to_user TEXT NOT NULL,
                nft_id TEXT NOT NULL,
                event_timestamp TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            table
        ))
        .execute(self.db.pool())
        .await?;

        for (suffix, columns) in [("users", "from_user, to_user"), ("nft", "nft_id")] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {}_{}_idx ON {} ({})",
                NFT_TRANSFER_TABLE, suffix, table, columns
            ))
            .execute(self.db.pool())
            .await?;
        }

        info!(table = %table, "Table initialized for {} events", NFT_TRANSFER_EVENT_TYPE);
        Ok(())
    }

    fn validate_payload(&self, record: &EventRecord) -> bool {
        !record.id.is_empty()
            && record.event_type == NFT_TRANSFER_EVENT_TYPE
            && NftTransferRow::from_payload(&encode_document_key(&record.key), &record.payload).is_ok()
    }

    async fn handle_job_event(&self, job: &JobData) -> Result<()> {
        let row = NftTransferRow::from_payload(&job.document_key, &job.payload)?;
        self.upsert(&row).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_row_from_ledger_event() {
        let (ledger, notifications) = populated_ledger().await;
        let records = records_of(&notifications, NFT_TRANSFER_EVENT_TYPE);
        assert_eq!(records.len(), 1);

        let job = JobData::from_record(&records[0]);
        let row = NftTransferRow::from_payload(&job.document_key, &job.payload).unwrap();
        assert_eq!(row.from_user, "alice");
        assert_eq!(row.to_user, "bob");
        assert!(row.nft_id.starts_with("nft_"));
        assert!(!row.txid.contains('\u{0}'));

        let document = ledger.get_document(&records[0].key).unwrap().unwrap();
        let synced = JobData::from_document(&document).unwrap();
        assert_eq!(row, NftTransferRow::from_payload(&synced.document_key, &synced.payload).unwrap());
    }

    #[test]
    fn test_rejects_coin_transfer_payload() {
        let payload = serde_json::json!({
            "docType": "coin-transfer-event",
            "from": "alice",
            "to": "bob",
            "amount": 1,
            "timestamp": "2022-01-01T09:00:00.000000Z"
        });
        assert!(NftTransferRow::from_payload("k", &payload).is_err());
    }
}
