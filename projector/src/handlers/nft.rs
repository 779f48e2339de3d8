use super::{decode_payload, parse_timestamp, EventHandler, JobData};
use crate::database::Database;
use crate::errors::{ProjectorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{EventRecord, LedgerDocument, Nft};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

pub const NFT_EVENT_TYPE: &str = "nft";
pub const NFT_TABLE: &str = "nft";

/// `nft` row; display fields are lifted out of the metadata object
#[derive(Debug, Clone, PartialEq)]
pub struct NftRow {
    pub nft_id: String,
    pub owner: String,
    pub creator: String,
    pub name: String,
    pub price: Option<Decimal>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub metadata: Value,
    pub burned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NftRow {
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let nft = Nft::from_document(decode_payload(NFT_EVENT_TYPE, payload)?)
            .map_err(|e| ProjectorError::invalid_payload(NFT_EVENT_TYPE, e.to_string()))?;

        let text = |field: &str| nft.metadata.get(field).and_then(Value::as_str).map(str::to_string);
        let name = text("name")
            .ok_or_else(|| ProjectorError::invalid_payload(NFT_EVENT_TYPE, "metadata.name is missing"))?;

        Ok(Self {
            name,
            price: nft.metadata.get("price").and_then(parse_price),
            description: text("description"),
            image: text("image"),
            created_at: parse_timestamp(NFT_EVENT_TYPE, &nft.created)?,
            updated_at: parse_timestamp(NFT_EVENT_TYPE, &nft.last_updated)?,
            nft_id: nft.id,
            owner: nft.owner.to_string(),
            creator: nft.creator.to_string(),
            burned: nft.burned,
            metadata: nft.metadata,
        })
    }
}

/// Prices are free-form metadata; anything unparseable is stored as NULL
fn parse_price(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    let price = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok();
    if price.is_none() {
        debug!(price = %text, "Ignoring unparseable NFT price");
    }
    price
}

pub struct NftHandler {
    db: Arc<Database>,
}

impl NftHandler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert; an older snapshot never overwrites a newer one
    pub async fn upsert(&self, row: &NftRow) -> Result<()> {
        let table = self.db.table(NFT_TABLE);
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {table}
                (nft_id, owner, creator, name, price, description, image, metadata, burned, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (nft_id) DO UPDATE SET
                owner = EXCLUDED.owner,
                creator = EXCLUDED.creator,
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                description = EXCLUDED.description,
                image = EXCLUDED.image,
                metadata = EXCLUDED.metadata,
                burned = EXCLUDED.burned,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at
            WHERE {table}.updated_at <= EXCLUDED.updated_at
            "#,
            table = table
        ))
        .bind(&row.nft_id)
        .bind(&row.owner)
        .bind(&row.creator)
        .bind(&row.name)
        .bind(row.price)
        .bind(&row.description)
        .bind(&row.image)
        .bind(&row.metadata)
        .bind(row.burned)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!(nft_id = %row.nft_id, "Skipped stale NFT snapshot");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for NftHandler {
    fn event_type(&self) -> &'static str {
        NFT_EVENT_TYPE
    }

    async fn initialize_tables(&self) -> Result<()> {
        let table = self.db.table(NFT_TABLE);
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                nft_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                creator TEXT NOT NULL,
                name TEXT NOT NULL,
                price NUMERIC,
                description TEXT,
                image TEXT,
                metadata JSONB NOT NULL,
                burned BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            table
        ))
        .execute(self.db.pool())
        .await?;

        for column in ["owner", "creator"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {}_{}_idx ON {} ({})",
                NFT_TABLE, column, table, column
            ))
            .execute(self.db.pool())
            .await?;
        }

        info!(table = %table, "Table initialized for {} events", NFT_EVENT_TYPE);
        Ok(())
    }

    fn validate_payload(&self, record: &EventRecord) -> bool {
        !record.id.is_empty()
            && record.event_type == NFT_EVENT_TYPE
            && NftRow::from_payload(&record.payload).is_ok()
    }

    async fn handle_job_event(&self, job: &JobData) -> Result<()> {
        let row = NftRow::from_payload(&job.payload)?;
        self.upsert(&row).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    fn payload(metadata: Value) -> Value {
        json!({
            "docType": "nft",
            "id": "nft_0123456789abcdef",
            "owner": "bob",
            "creator": "alice",
            "metadata": metadata,
            "created": "2022-01-01T00:00:00.000000Z",
            "lastUpdated": "2022-01-03T00:00:00.000000Z",
            "burned": false
        })
    }

    #[test]
    fn test_row_lifts_metadata_fields() {
        let metadata = json!({
            "name": "Badge",
            "price": 12.5,
            "description": "First badge",
            "image": "ipfs://badge"
        });
        let row = NftRow::from_payload(&payload(metadata.clone())).unwrap();

        assert_eq!(row.nft_id, "nft_0123456789abcdef");
        assert_eq!(row.owner, "bob");
        assert_eq!(row.creator, "alice");
        assert_eq!(row.name, "Badge");
        assert_eq!(row.price, Some(Decimal::new(125, 1)));
        assert_eq!(row.description.as_deref(), Some("First badge"));
        assert_eq!(row.image.as_deref(), Some("ipfs://badge"));
        assert_eq!(row.metadata, metadata);
        assert!(row.updated_at > row.created_at);
    }

    #[test]
    fn test_optional_metadata_fields() {
        let row = NftRow::from_payload(&payload(json!({"name": "Plain", "price": "n/a"}))).unwrap();
        assert_eq!(row.price, None);
        assert_eq!(row.description, None);
        assert_eq!(row.image, None);

        assert!(NftRow::from_payload(&payload(json!({"price": 1}))).is_err());
    }

    #[test]
    fn test_price_formats() {
        assert_eq!(parse_price(&json!("100")), Some(Decimal::new(100, 0)));
        assert_eq!(parse_price(&json!(" 0.25 ")), Some(Decimal::new(25, 2)));
        assert_eq!(parse_price(&json!(7)), Some(Decimal::new(7, 0)));
        assert_eq!(parse_price(&json!(true)), None);
    }

    #[tokio::test]
    async fn test_event_and_document_map_to_same_row() {
        let (ledger, notifications) = populated_ledger().await;
        let record = records_of(&notifications, NFT_EVENT_TYPE).pop().unwrap();
        let document = ledger.get_document(&record.key).unwrap().unwrap();

        let from_event = NftRow::from_payload(&record.payload).unwrap();
        let from_document = NftRow::from_payload(&document.to_value().unwrap()).unwrap();
        assert_eq!(from_event, from_document);
        assert_eq!(from_event.owner, "bob");
        assert_eq!(from_event.price, Some(Decimal::new(125, 1)));
    }
}
