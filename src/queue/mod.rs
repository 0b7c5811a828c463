//! Durable job queue contract and backends.
//!
//! Two implementations share one contract: [`SqlQueue`] persists jobs in a
//! SQL table and claims them atomically with `FOR UPDATE SKIP LOCKED`;
//! [`MemoryQueue`] backs dev mode and tests and additionally supports
//! submitting jobs and awaiting their terminal state.

mod memory;
mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ActionError, QueueError};

pub use memory::MemoryQueue;
pub use sql::SqlQueue;

/// Job lifecycle states. Ready → Assigned → Processing → Completed|Failed;
/// the terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Ready,
    Assigned,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "Ready",
            JobStatus::Assigned => "Assigned",
            JobStatus::Processing => "Processing",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        match raw {
            "Ready" => Ok(JobStatus::Ready),
            "Assigned" => Ok(JobStatus::Assigned),
            "Processing" => Ok(JobStatus::Processing),
            "Completed" => Ok(JobStatus::Completed),
            "Failed" => Ok(JobStatus::Failed),
            other => Err(QueueError::Consistency(format!(
                "unknown job status in backend: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error persisted with a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub error_code: String,
    pub error_message: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: code.into(),
            error_message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            "JOB_TIMEOUT",
            format!("job exceeded max processing time ({}s)", limit.as_secs_f64()),
        )
    }

    pub fn shutdown_interrupted() -> Self {
        Self::new(
            "SHUTDOWN_INTERRUPTED",
            "job was cancelled during worker shutdown",
        )
    }
}

impl From<&ActionError> for JobError {
    fn from(err: &ActionError) -> Self {
        Self::new(err.error_code(), err.to_string())
    }
}

/// One unit of work flowing through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Queue-scoped identifier; doubles as the log correlation token.
    pub id: String,
    /// Structured payload; must contain a string field `action`.
    pub payload: Value,
    pub status: JobStatus,
    /// Incremented on each claim.
    pub attempts: u32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<JobError>,
}

/// Backend-polymorphic queue contract. All operations may suspend on I/O.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Atomically claim up to `batch_size` Ready jobs for `worker_id`:
    /// mark them Assigned, increment `attempts`, and return them. No two
    /// concurrent callers ever receive the same job. An empty result is
    /// legal.
    async fn poll(&self, batch_size: usize, worker_id: &str) -> Result<Vec<Job>, QueueError>;

    /// Assigned → Processing. Idempotent if the job is already Processing.
    async fn mark_processing(&self, job_id: &str) -> Result<(), QueueError>;

    /// Transition to Completed and durably persist the result.
    async fn complete(&self, job_id: &str, result: Value) -> Result<(), QueueError>;

    /// Transition to Failed and durably persist the error. Failed is
    /// terminal; no requeue happens here.
    async fn fail(&self, job_id: &str, error: JobError) -> Result<(), QueueError>;

    /// Release pooled connections.
    async fn shutdown(&self) -> Result<(), QueueError>;
}
