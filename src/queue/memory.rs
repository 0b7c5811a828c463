//! In-memory queue backend for dev mode and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::{Job, JobError, JobQueue, JobStatus};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<String, Job>,
    ready: VecDeque<String>,
}

/// Dev-mode queue: the same contract as the durable backend, plus
/// [`MemoryQueue::submit`] and [`MemoryQueue::wait_for_terminal`] used by
/// the `/dev/job` endpoint.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    terminal: Notify,
}

impl MemoryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enqueue a payload as a Ready job and return its id.
    pub async fn submit(&self, payload: Value) -> String {
        let id = Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            payload,
            status: JobStatus::Ready,
            attempts: 0,
            claimed_at: None,
            completed_at: None,
            result: None,
            error: None,
        };
        let mut state = self.state.lock().await;
        state.jobs.insert(id.clone(), job);
        state.ready.push_back(id.clone());
        id
    }

    /// Wait until the job reaches Completed or Failed, or the deadline
    /// passes. Returns the job's state at that moment.
    pub async fn wait_for_terminal(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Job, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the notification before inspecting state so a transition
            // between check and wait is not lost.
            let notified = self.terminal.notified();
            {
                let state = self.state.lock().await;
                let job = state.jobs.get(job_id).ok_or_else(|| {
                    QueueError::Consistency(format!("job not found: {job_id}"))
                })?;
                if job.status.is_terminal() {
                    return Ok(job.clone());
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let state = self.state.lock().await;
                let job = state.jobs.get(job_id).ok_or_else(|| {
                    QueueError::Consistency(format!("job not found: {job_id}"))
                })?;
                return Ok(job.clone());
            }
        }
    }

    /// Number of jobs currently Ready. Observability only.
    pub async fn ready_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Ready)
            .count()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn poll(&self, batch_size: usize, worker_id: &str) -> Result<Vec<Job>, QueueError> {
        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();
        while claimed.len() < batch_size {
            let Some(id) = state.ready.pop_front() else {
                break;
            };
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Ready {
                continue;
            }
            job.status = JobStatus::Assigned;
            job.attempts += 1;
            job.claimed_at = Some(Utc::now());
            // claimed_by is implicit here: single process, one worker id.
            let _ = worker_id;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::Consistency(format!("job not found: {job_id}")))?;
        match job.status {
            JobStatus::Assigned => {
                job.status = JobStatus::Processing;
                Ok(())
            }
            JobStatus::Processing => Ok(()),
            other => Err(QueueError::Consistency(format!(
                "cannot mark {job_id} Processing from {other}"
            ))),
        }
    }

    async fn complete(&self, job_id: &str, result: Value) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::Consistency(format!("job not found: {job_id}")))?;
        if job.status.is_terminal() {
            return Err(QueueError::Consistency(format!(
                "job {job_id} is already terminal ({})",
                job.status
            )));
        }
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.completed_at = Some(Utc::now());
        drop(state);
        self.terminal.notify_waiters();
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: JobError) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::Consistency(format!("job not found: {job_id}")))?;
        if job.status.is_terminal() {
            return Err(QueueError::Consistency(format!(
                "job {job_id} is already terminal ({})",
                job.status
            )));
        }
        job.status = JobStatus::Failed;
        job.error = Some(error);
        job.completed_at = Some(Utc::now());
        drop(state);
        self.terminal.notify_waiters();
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_submit_and_poll_claims_job() {
        let queue = MemoryQueue::new();
        let id = queue.submit(json!({"action": "greet"})).await;

        let jobs = queue.poll(10, "worker-1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].status, JobStatus::Assigned);
        assert_eq!(jobs[0].attempts, 1);
        assert!(jobs[0].claimed_at.is_some());

        // Claimed jobs do not show up in a second poll.
        assert!(queue.poll(10, "worker-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_respects_batch_size() {
        let queue = MemoryQueue::new();
        for _ in 0..5 {
            queue.submit(json!({"action": "noop"})).await;
        }
        assert_eq!(queue.poll(2, "w").await.unwrap().len(), 2);
        assert_eq!(queue.poll(10, "w").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_polls_never_share_a_job() {
        let queue = MemoryQueue::new();
        for _ in 0..20 {
            queue.submit(json!({"action": "noop"})).await;
        }

        let (a, b) = tokio::join!(queue.poll(15, "w1"), queue.poll(15, "w2"));
        let a = a.unwrap();
        let b = b.unwrap();

        let mut ids: Vec<&str> = a.iter().chain(b.iter()).map(|j| j.id.as_str()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total, "polls returned overlapping jobs");
        assert!(total <= 20);
    }

    #[tokio::test]
    async fn test_mark_processing_idempotent() {
        let queue = MemoryQueue::new();
        let id = queue.submit(json!({"action": "noop"})).await;
        queue.poll(1, "w").await.unwrap();

        queue.mark_processing(&id).await.unwrap();
        queue.mark_processing(&id).await.unwrap();

        // Ready jobs cannot jump straight to Processing.
        let other = queue.submit(json!({"action": "noop"})).await;
        assert!(queue.mark_processing(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_complete_is_terminal() {
        let queue = MemoryQueue::new();
        let id = queue.submit(json!({"action": "noop"})).await;
        queue.poll(1, "w").await.unwrap();
        queue.mark_processing(&id).await.unwrap();
        queue.complete(&id, json!({"ok": true})).await.unwrap();

        // Any further terminal transition violates consistency.
        let err = queue.fail(&id, JobError::new("X", "boom")).await.unwrap_err();
        assert_eq!(err.error_code(), "QUEUE_CONSISTENCY");
        let err = queue.complete(&id, json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), "QUEUE_CONSISTENCY");
    }

    #[tokio::test]
    async fn test_wait_for_terminal_sees_completion() {
        let queue = MemoryQueue::new();
        let id = queue.submit(json!({"action": "noop"})).await;

        let waiter = {
            let queue = queue.clone();
            let id = id.clone();
            tokio::spawn(async move { queue.wait_for_terminal(&id, Duration::from_secs(2)).await })
        };

        queue.poll(1, "w").await.unwrap();
        queue.mark_processing(&id).await.unwrap();
        queue.complete(&id, json!({"done": true})).await.unwrap();

        let job = waiter.await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"done": true})));
    }

    #[tokio::test]
    async fn test_wait_for_terminal_times_out_with_current_state() {
        let queue = MemoryQueue::new();
        let id = queue.submit(json!({"action": "noop"})).await;
        let job = queue
            .wait_for_terminal(&id, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Ready);
    }
}
