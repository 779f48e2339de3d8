use super::{decode_payload, parse_timestamp, to_bigint, EventHandler, JobData};
use crate::database::Database;
use crate::errors::{ProjectorError, Result};
use crate::keys::encode_document_key;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::{CoinTransferEvent, EventRecord, LedgerDocument};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub const COIN_TRANSFER_EVENT_TYPE: &str = "coin-transfer-event";
pub const TRANSFER_TABLE: &str = "transfer";

/// `transfer` row, keyed by the escaped ledger key
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRow {
    pub txid: String,
    pub from_user: String,
    pub to_user: String,
    pub amount: i64,
    pub expiration_date: Option<NaiveDate>,
    pub event_timestamp: DateTime<Utc>,
}

impl TransferRow {
    pub fn from_payload(document_key: &str, payload: &Value) -> Result<Self> {
        let event = CoinTransferEvent::from_document(decode_payload(COIN_TRANSFER_EVENT_TYPE, payload)?)
            .map_err(|e| ProjectorError::invalid_payload(COIN_TRANSFER_EVENT_TYPE, e.to_string()))?;

        Ok(Self {
            txid: document_key.to_string(),
            from_user: event.from.to_string(),
            to_user: event.to.to_string(),
            amount: to_bigint(COIN_TRANSFER_EVENT_TYPE, "amount", event.amount)?,
            expiration_date: event.expiration_date,
            event_timestamp: parse_timestamp(COIN_TRANSFER_EVENT_TYPE, &event.timestamp)?,
        })
    }
}

pub struct CoinTransferHandler {
    db: Arc<Database>,
}

impl CoinTransferHandler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn upsert(&self, row: &TransferRow) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (txid, from_user, to_user, amount, expiration_date, event_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (txid) DO UPDATE SET
                from_user = EXCLUDED.from_user,
                to_user = EXCLUDED.to_user,
                amount = EXCLUDED.amount,
                expiration_date = EXCLUDED.expiration_date,
                event_timestamp = EXCLUDED.event_timestamp
            "#,
            self.db.table(TRANSFER_TABLE)
        ))
        .bind(&row.txid)
        .bind(&row.from_user)
        .bind(&row.to_user)
        .bind(row.amount)
        .bind(row.expiration_date)
        .bind(row.event_timestamp)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventHandler for CoinTransferHandler {
    fn event_type(&self) -> &'static str {
        COIN_TRANSFER_EVENT_TYPE
    }

    async fn initialize_tables(&self) -> Result<()> {
        let table = self.db.table(TRANSFER_TABLE);
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                txid TEXT PRIMARY KEY,
                from_user TEXT NOT NULL,
                to_user TEXT NOT NULL,
                amount BIGINT NOT NULL,
                expiration_date DATE,
                event_timestamp TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            table
        ))
        .execute(self.db.pool())
        .await?;

        for (suffix, columns) in [("users", "from_user, to_user"), ("timestamp", "event_timestamp")] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {}_{}_idx ON {} ({})",
                TRANSFER_TABLE, suffix, table, columns
            ))
            .execute(self.db.pool())
            .await?;
        }

        info!(table = %table, "Table initialized for {} events", COIN_TRANSFER_EVENT_TYPE);
        Ok(())
    }

    fn validate_payload(&self, record: &EventRecord) -> bool {
        !record.id.is_empty()
            && record.event_type == COIN_TRANSFER_EVENT_TYPE
            && TransferRow::from_payload(&encode_document_key(&record.key), &record.payload).is_ok()
    }

    async fn handle_job_event(&self, job: &JobData) -> Result<()> {
        let row = TransferRow::from_payload(&job.document_key, &job.payload)?;
        self.upsert(&row).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_from_payload() {
        let payload = json!({
            "docType": "coin-transfer-event",
            "from": "0x0",
            "to": "alice",
            "amount": 100,
            "expirationDate": "2022-06-30",
            "timestamp": "2022-01-01T09:00:00.000000Z"
        });
        let row = TransferRow::from_payload("{u0000}coin-transfer-event{u0000}k{u0000}", &payload).unwrap();

        assert_eq!(row.txid, "{u0000}coin-transfer-event{u0000}k{u0000}");
        assert_eq!(row.from_user, "0x0");
        assert_eq!(row.to_user, "alice");
        assert_eq!(row.amount, 100);
        assert_eq!(row.expiration_date, NaiveDate::from_ymd_opt(2022, 6, 30));
    }

    #[test]
    fn test_non_expiring_transfer() {
        let payload = json!({
            "docType": "coin-transfer-event",
            "from": "alice",
            "to": "bob",
            "amount": 5,
            "timestamp": "2022-01-01T09:00:00.000000Z"
        });
        let row = TransferRow::from_payload("k", &payload).unwrap();
        assert_eq!(row.expiration_date, None);
    }

    #[test]
    fn test_rejects_malformed_amount() {
        let payload = json!({
            "docType": "coin-transfer-event",
            "from": "alice",
            "to": "bob",
            "amount": "lots",
            "timestamp": "2022-01-01T09:00:00.000000Z"
        });
        assert!(TransferRow::from_payload("k", &payload).is_err());
    }

    #[tokio::test]
    async fn test_event_and_document_map_to_same_row() {
        let (ledger, notifications) = populated_ledger().await;
        let record = records_of(&notifications, COIN_TRANSFER_EVENT_TYPE).remove(0);
        let document = ledger.get_document(&record.key).unwrap().unwrap();

        let job = JobData::from_record(&record);
        let synced = JobData::from_document(&document).unwrap();
        assert_eq!(
            TransferRow::from_payload(&job.document_key, &job.payload).unwrap(),
            TransferRow::from_payload(&synced.document_key, &synced.payload).unwrap()
        );
    }
}
