use crate::config::{validate_identifier, DatabaseConfig};
use crate::errors::Result;
use crate::handlers::{NFT_TABLE, NFT_TRANSFER_TABLE, TRANSFER_TABLE, USER_TABLE};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

const SYSTEM_ACCOUNT: &str = ledger_core::SYSTEM_ACCOUNT;

pub struct Database {
    pool: PgPool,
    schema: String,
}

/// Optional inclusive bounds on event timestamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    fn push_filters(&self, qb: &mut QueryBuilder<'_, Postgres>, column: &str) {
        if let Some(start) = self.start {
            qb.push(format!(" AND {} >= ", column)).push_bind(start);
        }
        if let Some(end) = self.end {
            qb.push(format!(" AND {} <= ", column)).push_bind(end);
        }
    }
}

/// Which side of a transfer an account is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Spend,
    Received,
}

/// `LIMIT`/`OFFSET` window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub size: i64,
    pub skip: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub txid: String,
    pub from_user: String,
    pub to_user: String,
    pub amount: i64,
    pub expiration_date: Option<NaiveDate>,
    pub event_timestamp: DateTime<Utc>,
    /// `spend` or `received` relative to the queried account
    pub direction: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// Minted to active accounts
    pub received_from_system: i64,
    /// Sent by active accounts
    pub spent_to_others: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NftRecord {
    pub nft_id: String,
    pub owner: String,
    pub creator: String,
    pub metadata: Value,
    pub burned: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NftTransferRecord {
    pub from_user: String,
    pub to_user: String,
    pub event_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NftHistory {
    pub token_id: String,
    pub metadata: Value,
    pub current_owner: String,
    pub burned: bool,
    pub created: DateTime<Utc>,
    pub transaction_history: Vec<NftTransferRecord>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        validate_identifier(&config.schema)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        info!(schema = %config.schema, "Connected to projection database");

        Ok(Database {
            pool,
            schema: config.schema.clone(),
        })
    }

    /// Pool that connects on first use
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        validate_identifier(&config.schema)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(&config.url)?;

        Ok(Database {
            pool,
            schema: config.schema.clone(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Schema-qualified table name
    pub fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    pub async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Balances of the given accounts; unknown accounts are absent
    pub async fn balance_of(&self, account_ids: &[String]) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT account_id, balance FROM {} WHERE account_id = ANY($1)",
            self.table(USER_TABLE)
        ))
        .bind(account_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Sum of balances of active or inactive accounts
    pub async fn total_balance_by_status(&self, active: bool) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM(balance), 0)::BIGINT FROM {} WHERE active = $1",
            self.table(USER_TABLE)
        ))
        .bind(active)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    /// Minted amount, optionally only to active accounts
    pub async fn total_supply(&self, range: TimeRange, active_only: bool) -> Result<i64> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT COALESCE(SUM(t.amount), 0)::BIGINT FROM {} t",
            self.table(TRANSFER_TABLE)
        ));
        if active_only {
            qb.push(format!(
                " JOIN {} u_to ON t.to_user = u_to.account_id",
                self.table(USER_TABLE)
            ));
        }
        qb.push(" WHERE t.from_user = ").push_bind(SYSTEM_ACCOUNT);
        if active_only {
            qb.push(" AND u_to.active = TRUE");
        }
        range.push_filters(&mut qb, "t.event_timestamp");

        let total: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total)
    }

    /// Transfers touching `account_id`, newest first
    pub async fn transfer_events(
        &self,
        account_id: &str,
        range: TimeRange,
        direction: Option<TransferDirection>,
        page: Option<Page>,
    ) -> Result<Vec<TransferRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT txid, from_user, to_user, amount, expiration_date, event_timestamp, \
             CASE WHEN from_user = ",
        );
        qb.push_bind(account_id.to_string());
        qb.push(format!(
            " THEN 'spend' ELSE 'received' END AS direction FROM {} WHERE TRUE",
            self.table(TRANSFER_TABLE)
        ));
        Self::push_account_filter(&mut qb, account_id, direction);
        range.push_filters(&mut qb, "event_timestamp");
        qb.push(" ORDER BY event_timestamp DESC, txid");
        if let Some(page) = page {
            qb.push(" LIMIT ").push_bind(page.size);
            qb.push(" OFFSET ").push_bind(page.skip);
        }

        let records = qb.build_query_as::<TransferRecord>().fetch_all(&self.pool).await?;
        Ok(records)
    }

    pub async fn transfer_events_count(
        &self,
        account_id: &str,
        range: TimeRange,
        direction: Option<TransferDirection>,
    ) -> Result<i64> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT COUNT(*) FROM {} WHERE TRUE",
            self.table(TRANSFER_TABLE)
        ));
        Self::push_account_filter(&mut qb, account_id, direction);
        range.push_filters(&mut qb, "event_timestamp");

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    fn push_account_filter(
        qb: &mut QueryBuilder<'_, Postgres>,
        account_id: &str,
        direction: Option<TransferDirection>,
    ) {
        match direction {
            Some(TransferDirection::Spend) => {
                qb.push(" AND from_user = ").push_bind(account_id.to_string());
            }
            Some(TransferDirection::Received) => {
                qb.push(" AND to_user = ").push_bind(account_id.to_string());
            }
            None => {
                qb.push(" AND (from_user = ").push_bind(account_id.to_string());
                qb.push(" OR to_user = ").push_bind(account_id.to_string());
                qb.push(")");
            }
        }
    }

    pub async fn user_summary(&self, range: TimeRange) -> Result<UserSummary> {
        let users = self.table(USER_TABLE);
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COALESCE(SUM(CASE WHEN t.from_user = ");
        qb.push_bind(SYSTEM_ACCOUNT);
        qb.push(format!(
            " AND u_to.active THEN t.amount ELSE 0 END), 0)::BIGINT, \
             COALESCE(SUM(CASE WHEN u_from.active THEN t.amount ELSE 0 END), 0)::BIGINT \
             FROM {} t \
             LEFT JOIN {users} u_to ON t.to_user = u_to.account_id \
             LEFT JOIN {users} u_from ON t.from_user = u_from.account_id \
             WHERE TRUE",
            self.table(TRANSFER_TABLE),
            users = users
        ));
        range.push_filters(&mut qb, "t.event_timestamp");

        let (received_from_system, spent_to_others): (i64, i64) =
            qb.build_query_as().fetch_one(&self.pool).await?;

        Ok(UserSummary {
            received_from_system,
            spent_to_others,
        })
    }

    /// An NFT and every recorded change of hands
    pub async fn nft_with_history(&self, nft_id: &str) -> Result<Option<NftHistory>> {
        let nft = sqlx::query_as::<_, NftRecord>(&format!(
            "SELECT nft_id, owner, creator, metadata, burned, created_at FROM {} WHERE nft_id = $1",
            self.table(NFT_TABLE)
        ))
        .bind(nft_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(nft) = nft else {
            return Ok(None);
        };

        let history = sqlx::query_as::<_, NftTransferRecord>(&format!(
            "SELECT from_user, to_user, event_timestamp FROM {} \
             WHERE nft_id = $1 ORDER BY event_timestamp",
            self.table(NFT_TRANSFER_TABLE)
        ))
        .bind(nft_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(NftHistory {
            token_id: nft.nft_id,
            metadata: nft.metadata,
            current_owner: nft.owner,
            burned: nft.burned,
            created: nft.created_at,
            transaction_history: history,
        }))
    }

    pub async fn nfts_by_owner(&self, owner: &str) -> Result<Vec<NftRecord>> {
        let nfts = sqlx::query_as::<_, NftRecord>(&format!(
            "SELECT nft_id, owner, creator, metadata, burned, created_at FROM {} \
             WHERE owner = $1 ORDER BY created_at",
            self.table(NFT_TABLE)
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(nfts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(schema: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: "postgres://localhost/coinledger".to_string(),
            max_connections: 1,
            min_connections: 0,
            schema: schema.to_string(),
        }
    }

    #[tokio::test]
    async fn test_table_names_are_schema_qualified() {
        let db = Database::connect_lazy(&config("coinledger")).unwrap();
        assert_eq!(db.table(USER_TABLE), "coinledger.user_info");
        assert_eq!(db.schema(), "coinledger");
    }

    #[tokio::test]
    async fn test_rejects_unsafe_schema() {
        assert!(Database::connect_lazy(&config("x; DROP SCHEMA public")).is_err());
    }

    #[test]
    fn test_time_range_filters() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 WHERE TRUE");
        TimeRange::new(Some(Utc::now()), None).push_filters(&mut qb, "t.event_timestamp");
        assert_eq!(qb.sql(), "SELECT 1 WHERE TRUE AND t.event_timestamp >= $1");

        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 WHERE TRUE");
        TimeRange::default().push_filters(&mut qb, "event_timestamp");
        assert_eq!(qb.sql(), "SELECT 1 WHERE TRUE");
    }

    #[test]
    fn test_account_filter_by_direction() {
        let mut qb = QueryBuilder::<Postgres>::new("WHERE TRUE");
        Database::push_account_filter(&mut qb, "alice", Some(TransferDirection::Spend));
        assert_eq!(qb.sql(), "WHERE TRUE AND from_user = $1");

        let mut qb = QueryBuilder::<Postgres>::new("WHERE TRUE");
        Database::push_account_filter(&mut qb, "alice", None);
        assert_eq!(qb.sql(), "WHERE TRUE AND (from_user = $1 OR to_user = $2)");
    }
}
