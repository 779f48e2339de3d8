//! Durable job queue on PostgreSQL
//!
//! A small pg-boss style queue: jobs live in one table, are claimed with
//! `FOR UPDATE SKIP LOCKED` in insertion order and move through
//! `created -> active -> completed`, or `retry`/`failed` when they fail.
//! A failed job stays in the table until it is requeued or deleted; completed
//! jobs are purged once they pass their retention.

use crate::database::Database;
use crate::errors::{ProjectorError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const QUEUE_TABLE: &str = "queue";
const JOB_TABLE: &str = "job";
const JOB_COLUMNS: &str =
    "id, name, data, state, retry_count, retry_limit, output, created_at, started_at, completed_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Retry,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Retry => "retry",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ProjectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(JobState::Created),
            "retry" => Ok(JobState::Retry),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(ProjectorError::EventProcessing(format!(
                "unknown job state {:?}",
                other
            ))),
        }
    }
}

/// Retry policy of a named queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub name: String,
    pub retry_limit: i32,
    pub retry_delay_secs: i32,
}

impl QueueOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry_limit: 0,
            retry_delay_secs: 0,
        }
    }

    pub fn with_retry(mut self, retry_limit: i32, retry_delay_secs: i32) -> Self {
        self.retry_limit = retry_limit;
        self.retry_delay_secs = retry_delay_secs;
        self
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    data: Value,
    state: String,
    retry_count: i32,
    retry_limit: i32,
    output: Option<Value>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub data: Value,
    pub state: JobState,
    pub retry_count: i32,
    pub retry_limit: i32,
    /// `{"error": ...}` of the last failure
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = ProjectorError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            state: row.state.parse()?,
            id: row.id,
            queue: row.name,
            data: row.data,
            retry_count: row.retry_count,
            retry_limit: row.retry_limit,
            output: row.output,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Job queued together with a failure by [`JobQueue::fail_and_send`]
#[derive(Debug, Clone, Copy)]
pub struct FollowUp<'a> {
    pub queue: &'a str,
    pub id: &'a str,
    pub data: &'a Value,
}

pub struct JobQueue {
    db: Arc<Database>,
}

impl JobQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn initialize(&self) -> Result<()> {
        let queues = self.db.table(QUEUE_TABLE);
        let jobs = self.db.table(JOB_TABLE);

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                retry_limit INTEGER NOT NULL DEFAULT 0,
                retry_delay_secs INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            queues
        ))
        .execute(self.db.pool())
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {jobs} (
                id TEXT NOT NULL,
                name TEXT NOT NULL REFERENCES {queues} (name),
                seq BIGSERIAL,
                data JSONB NOT NULL,
                state TEXT NOT NULL DEFAULT 'created',
                retry_count INTEGER NOT NULL DEFAULT 0,
                retry_limit INTEGER NOT NULL DEFAULT 0,
                retry_delay_secs INTEGER NOT NULL DEFAULT 0,
                start_after TIMESTAMPTZ NOT NULL DEFAULT now(),
                output JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                PRIMARY KEY (name, id)
            )
            "#,
            jobs = jobs,
            queues = queues
        ))
        .execute(self.db.pool())
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS job_fetch_idx ON {} (name, state, seq)",
            jobs
        ))
        .execute(self.db.pool())
        .await?;

        info!(schema = %self.db.schema(), "Job queue tables initialized");
        Ok(())
    }

    /// Create or update a queue's retry policy
    pub async fn create_queue(&self, options: &QueueOptions) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (name, retry_limit, retry_delay_secs)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                retry_limit = EXCLUDED.retry_limit,
                retry_delay_secs = EXCLUDED.retry_delay_secs
            "#,
            self.db.table(QUEUE_TABLE)
        ))
        .bind(&options.name)
        .bind(options.retry_limit)
        .bind(options.retry_delay_secs)
        .execute(self.db.pool())
        .await?;

        info!(
            queue = %options.name,
            retry_limit = options.retry_limit,
            retry_delay_secs = options.retry_delay_secs,
            "Queue ready"
        );
        Ok(())
    }

    /// Insert a job; returns false when a job with this id already exists
    pub async fn send(&self, queue: &str, id: &str, data: &Value) -> Result<bool> {
        let mut conn = self.db.pool().acquire().await?;
        self.send_on(&mut *conn, queue, id, data).await
    }

    async fn send_on(
        &self,
        conn: &mut PgConnection,
        queue: &str,
        id: &str,
        data: &Value,
    ) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {jobs} (id, name, data, retry_limit, retry_delay_secs)
            SELECT $1, q.name, $3, q.retry_limit, q.retry_delay_secs
            FROM {queues} q
            WHERE q.name = $2
            ON CONFLICT (name, id) DO NOTHING
            "#,
            jobs = self.db.table(JOB_TABLE),
            queues = self.db.table(QUEUE_TABLE)
        ))
        .bind(id)
        .bind(queue)
        .bind(data)
        .execute(conn)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(queue, id, "Job already queued");
        }
        Ok(inserted)
    }

    /// Claim the oldest runnable job
    pub async fn fetch(&self, queue: &str) -> Result<Option<Job>> {
        let jobs = self.db.table(JOB_TABLE);
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE {jobs} SET state = 'active', started_at = now()
            WHERE name = $1 AND id = (
                SELECT id FROM {jobs}
                WHERE name = $1
                  AND state IN ('created', 'retry')
                  AND start_after <= now()
                ORDER BY seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {columns}
            "#,
            jobs = jobs,
            columns = JOB_COLUMNS
        ))
        .bind(queue)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Job::try_from).transpose()
    }

    pub async fn complete(&self, queue: &str, id: &str) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET state = 'completed', completed_at = now() WHERE name = $1 AND id = $2",
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Record a failure; schedules a retry while attempts remain
    ///
    /// Returns the job's new state, `Retry` or `Failed`.
    pub async fn fail(&self, queue: &str, id: &str, error: &str) -> Result<JobState> {
        let mut conn = self.db.pool().acquire().await?;
        self.fail_on(&mut *conn, queue, id, error).await
    }

    /// Record a failure and queue a follow-up job in one transaction
    ///
    /// Either both writes land or neither does, so a failed job is never
    /// left without its follow-up.
    pub async fn fail_and_send(
        &self,
        queue: &str,
        id: &str,
        error: &str,
        follow_up: &FollowUp<'_>,
    ) -> Result<JobState> {
        let mut tx = self.db.pool().begin().await?;
        self.send_on(&mut *tx, follow_up.queue, follow_up.id, follow_up.data)
            .await?;
        let state = self.fail_on(&mut *tx, queue, id, error).await?;
        tx.commit().await?;
        Ok(state)
    }

    async fn fail_on(
        &self,
        conn: &mut PgConnection,
        queue: &str,
        id: &str,
        error: &str,
    ) -> Result<JobState> {
        let state: String = sqlx::query_scalar(&format!(
            r#"
            UPDATE {} SET
                state = CASE WHEN retry_count < retry_limit THEN 'retry' ELSE 'failed' END,
                retry_count = CASE WHEN retry_count < retry_limit THEN retry_count + 1 ELSE retry_count END,
                start_after = CASE
                    WHEN retry_count < retry_limit THEN now() + make_interval(secs => retry_delay_secs)
                    ELSE start_after
                END,
                completed_at = CASE WHEN retry_count < retry_limit THEN NULL ELSE now() END,
                output = jsonb_build_object('error', $3::TEXT)
            WHERE name = $1 AND id = $2
            RETURNING state
            "#,
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(id)
        .bind(error)
        .fetch_one(conn)
        .await?;

        state.parse()
    }

    /// Hand an active job back to the queue without counting an attempt
    pub async fn release(&self, queue: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET state = 'retry', started_at = NULL \
             WHERE name = $1 AND id = $2 AND state = 'active'",
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete completed jobs finished more than `older_than` ago
    ///
    /// Ids of purged jobs can be queued again; the listener checkpoint keeps
    /// replays from reaching that far back.
    pub async fn purge_completed(&self, queue: &str, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE name = $1 AND state = 'completed' \
             AND completed_at < now() - make_interval(secs => $2)",
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(older_than.as_secs_f64())
        .execute(self.db.pool())
        .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            info!(queue, purged, "Purged completed jobs");
        }
        Ok(purged)
    }

    pub async fn delete(&self, queue: &str, id: &str) -> Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE name = $1 AND id = $2",
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Return jobs left `active` by a crashed worker to the queue
    pub async fn reset_active(&self, queue: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET state = 'retry', started_at = NULL WHERE name = $1 AND state = 'active'",
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .execute(self.db.pool())
        .await?;

        let reset = result.rows_affected();
        if reset > 0 {
            info!(queue, reset, "Reset stranded active jobs");
        }
        Ok(reset)
    }

    /// Dead letters, oldest first
    pub async fn list_failed(&self, queue: &str, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM {} WHERE name = $1 AND state = 'failed' ORDER BY seq LIMIT $2",
            JOB_COLUMNS,
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    /// Put a failed job back with a fresh retry budget
    pub async fn requeue(&self, queue: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET
                state = 'retry',
                retry_count = 0,
                start_after = now(),
                started_at = NULL,
                completed_at = NULL
            WHERE name = $1 AND id = $2 AND state = 'failed'
            "#,
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        let requeued = result.rows_affected() == 1;
        if requeued {
            info!(queue, id, "Requeued failed job");
        }
        Ok(requeued)
    }

    pub async fn get(&self, queue: &str, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM {} WHERE name = $1 AND id = $2",
            JOB_COLUMNS,
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Job::try_from).transpose()
    }

    pub async fn count(&self, queue: &str, state: JobState) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE name = $1 AND state = $2",
            self.db.table(JOB_TABLE)
        ))
        .bind(queue)
        .bind(state.as_str())
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }
}
