use super::{decode_payload, parse_timestamp, to_bigint, EventHandler, JobData};
use crate::database::Database;
use crate::errors::{ProjectorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{EventRecord, LedgerDocument, UserAccount, SYSTEM_ACCOUNT};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const USER_INFO_EVENT_TYPE: &str = "user-info";
pub const USER_TABLE: &str = "user_info";

/// `user_info` row
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub account_id: String,
    pub user_id: String,
    pub role: String,
    pub balance: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let account = UserAccount::from_document(decode_payload(USER_INFO_EVENT_TYPE, payload)?)
            .map_err(|e| ProjectorError::invalid_payload(USER_INFO_EVENT_TYPE, e.to_string()))?;

        Ok(Self {
            account_id: account.account_id.to_string(),
            user_id: account.user_id,
            role: account.role,
            balance: to_bigint(USER_INFO_EVENT_TYPE, "balance", account.balance)?,
            active: account.active,
            created_at: parse_timestamp(USER_INFO_EVENT_TYPE, &account.created)?,
            updated_at: parse_timestamp(USER_INFO_EVENT_TYPE, &account.updated)?,
        })
    }
}

pub struct UserInfoHandler {
    db: Arc<Database>,
}

impl UserInfoHandler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert; an older snapshot never overwrites a newer one
    pub async fn upsert(&self, row: &UserRow) -> Result<()> {
        let table = self.db.table(USER_TABLE);
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {table} (account_id, user_id, role, balance, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                role = EXCLUDED.role,
                balance = EXCLUDED.balance,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            WHERE {table}.updated_at <= EXCLUDED.updated_at
            "#,
            table = table
        ))
        .bind(&row.account_id)
        .bind(&row.user_id)
        .bind(&row.role)
        .bind(row.balance)
        .bind(row.active)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!(account_id = %row.account_id, "Skipped stale user snapshot");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for UserInfoHandler {
    fn event_type(&self) -> &'static str {
        USER_INFO_EVENT_TYPE
    }

    async fn initialize_tables(&self) -> Result<()> {
        let table = self.db.table(USER_TABLE);
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                account_id TEXT PRIMARY KEY,
                user_id TEXT UNIQUE NOT NULL,
                role TEXT NOT NULL,
                balance BIGINT NOT NULL DEFAULT 0,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            table = table
        ))
        .execute(self.db.pool())
        .await?;

        sqlx::query(&format!(
            "INSERT INTO {} (account_id, user_id, role, balance, active) \
             VALUES ($1, 'system', 'admin', 0, FALSE) ON CONFLICT (account_id) DO NOTHING",
            table
        ))
        .bind(SYSTEM_ACCOUNT)
        .execute(self.db.pool())
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {}_active_idx ON {} (active)",
            USER_TABLE, table
        ))
        .execute(self.db.pool())
        .await?;

        info!(table = %table, "Table initialized for {} events", USER_INFO_EVENT_TYPE);
        Ok(())
    }

    fn validate_payload(&self, record: &EventRecord) -> bool {
        !record.id.is_empty()
            && record.event_type == USER_INFO_EVENT_TYPE
            && UserRow::from_payload(&record.payload).is_ok()
    }

    async fn handle_job_event(&self, job: &JobData) -> Result<()> {
        let row = UserRow::from_payload(&job.payload)?;
        self.upsert(&row).await
    }
}
