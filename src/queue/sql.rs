//! Durable SQL-backed queue.
//!
//! Claims are a single atomic statement: an `UPDATE` over a `FOR UPDATE
//! SKIP LOCKED` subselect, so concurrent workers never claim the same row.
//! Any transport failure surfaces as [`QueueError::Unavailable`]; the worker
//! records it against the `job_queue` health check and retries after the
//! polling interval. Claimed rows stay Assigned across a reconnect.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::config::QueueDbSettings;
use crate::error::QueueError;
use crate::queue::{Job, JobError, JobQueue, JobStatus};

/// SQL queue backend over a connection pool.
#[derive(Debug, Clone)]
pub struct SqlQueue {
    pool: PgPool,
    table: String,
}

impl SqlQueue {
    /// Connect a pool sized for `pool_size` concurrent uses (at least one
    /// per in-flight dispatch plus one for the poller).
    pub async fn connect(db: &QueueDbSettings, pool_size: u32) -> Result<Self, QueueError> {
        let table = validate_table_name(&db.table)?;
        let pool = PgPoolOptions::new()
            .max_connections(pool_size.max(2))
            .connect(&db.connection_url())
            .await?;
        info!(table = %table, pool_size = pool_size, "job queue connected");
        Ok(Self { pool, table })
    }

    /// Wrap an existing pool; used by tests and embedders that manage their
    /// own connections.
    pub fn with_pool(pool: PgPool, table: &str) -> Result<Self, QueueError> {
        Ok(Self {
            pool,
            table: validate_table_name(table)?,
        })
    }

    /// Create the queue table and its status index when absent. Schema
    /// bootstrap helper for development and first deployments.
    pub async fn ensure_table(&self) -> Result<(), QueueError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'Ready',
                payload JSONB NOT NULL,
                claimed_by TEXT,
                claimed_at TIMESTAMPTZ,
                attempts INT NOT NULL DEFAULT 0,
                result JSONB,
                error_code TEXT,
                error_message TEXT,
                completed_at TIMESTAMPTZ
            )",
            t = self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_status ON {t} (status)",
            t = self.table
        );
        sqlx::query(&index).execute(&self.pool).await?;
        Ok(())
    }

    fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, QueueError> {
        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("attempts")?;
        let error_code: Option<String> = row.try_get("error_code")?;
        let error_message: Option<String> = row.try_get("error_message")?;
        let error = error_code.map(|code| JobError {
            error_code: code,
            error_message: error_message.unwrap_or_default(),
        });
        Ok(Job {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            status: JobStatus::parse(&status)?,
            attempts: attempts.max(0) as u32,
            claimed_at: row.try_get("claimed_at")?,
            completed_at: row.try_get("completed_at")?,
            result: row.try_get("result")?,
            error,
        })
    }
}

#[async_trait]
impl JobQueue for SqlQueue {
    async fn poll(&self, batch_size: usize, worker_id: &str) -> Result<Vec<Job>, QueueError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "UPDATE {t}
                SET status = 'Assigned',
                    claimed_by = $1,
                    claimed_at = NOW(),
                    attempts = attempts + 1
              WHERE id IN (
                    SELECT id FROM {t}
                     WHERE status = 'Ready'
                     ORDER BY id
                     LIMIT $2
                       FOR UPDATE SKIP LOCKED
              )
              RETURNING id, payload, status, attempts, claimed_at,
                        completed_at, result, error_code, error_message",
            t = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(worker_id)
            .bind(batch_size as i64)
            .fetch_all(&self.pool)
            .await?;

        let jobs = rows
            .iter()
            .map(Self::job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        if !jobs.is_empty() {
            debug!(claimed = jobs.len(), worker_id = %worker_id, "claimed jobs from queue");
        }
        Ok(jobs)
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), QueueError> {
        let sql = format!(
            "UPDATE {t} SET status = 'Processing'
              WHERE id = $1 AND status IN ('Assigned', 'Processing')",
            t = self.table
        );
        let result = sqlx::query(&sql).bind(job_id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::Consistency(format!(
                "cannot mark {job_id} Processing: not found or not claimed"
            )));
        }
        Ok(())
    }

    async fn complete(&self, job_id: &str, result: Value) -> Result<(), QueueError> {
        let sql = format!(
            "UPDATE {t}
                SET status = 'Completed',
                    result = $2,
                    error_code = NULL,
                    error_message = NULL,
                    completed_at = NOW()
              WHERE id = $1 AND status NOT IN ('Completed', 'Failed')",
            t = self.table
        );
        let outcome = sqlx::query(&sql)
            .bind(job_id)
            .bind(result)
            .execute(&self.pool)
            .await?;
        if outcome.rows_affected() == 0 {
            return Err(QueueError::Consistency(format!(
                "cannot complete {job_id}: not found or already terminal"
            )));
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: JobError) -> Result<(), QueueError> {
        let sql = format!(
            "UPDATE {t}
                SET status = 'Failed',
                    error_code = $2,
                    error_message = $3,
                    completed_at = NOW()
              WHERE id = $1 AND status NOT IN ('Completed', 'Failed')",
            t = self.table
        );
        let outcome = sqlx::query(&sql)
            .bind(job_id)
            .bind(&error.error_code)
            .bind(&error.error_message)
            .execute(&self.pool)
            .await?;
        if outcome.rows_affected() == 0 {
            return Err(QueueError::Consistency(format!(
                "cannot fail {job_id}: not found or already terminal"
            )));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        self.pool.close().await;
        Ok(())
    }
}

/// The table name comes from configuration, not user input, but it is
/// interpolated into SQL text; restrict it to identifier characters.
fn validate_table_name(table: &str) -> Result<String, QueueError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.chars().next().is_some_and(|c| c.is_ascii_digit());
    if valid {
        Ok(table.to_string())
    } else {
        Err(QueueError::Unavailable(format!(
            "invalid queue table name: {table:?}"
        )))
    }
}
