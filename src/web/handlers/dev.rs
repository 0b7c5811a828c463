//! Dev-mode job submission endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::queue::{JobError, JobStatus};
use crate::web::AppState;

/// Response for `POST /dev/job`.
#[derive(Debug, Serialize)]
pub struct DevJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub results: Option<Value>,
    pub error: Option<JobError>,
    pub runtime_ms: u64,
}

/// `POST /dev/job` — submit the JSON body as a job, wait for its terminal
/// state, and surface the result or the structured error verbatim. 200 on
/// Completed, 422 on Failed, 504 if the job has not terminated within the
/// job timeout (plus a scheduling margin).
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<DevJobResponse>) {
    let queue = state
        .dev_queue
        .as_ref()
        .expect("dev route mounted without dev queue");

    let started = Instant::now();
    let job_id = queue.submit(payload).await;
    info!(token = %job_id, "dev job submitted");

    let deadline = state.job_timeout + Duration::from_secs(1);
    let job = match queue.wait_for_terminal(&job_id, deadline).await {
        Ok(job) => job,
        Err(e) => {
            // The job vanished from the in-memory store; report it as a
            // consistency failure.
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DevJobResponse {
                    job_id,
                    status: JobStatus::Failed,
                    results: None,
                    error: Some(JobError::new(e.error_code(), e.to_string())),
                    runtime_ms: started.elapsed().as_millis() as u64,
                }),
            );
        }
    };

    let runtime_ms = started.elapsed().as_millis() as u64;
    let code = match job.status {
        JobStatus::Completed => StatusCode::OK,
        JobStatus::Failed => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::GATEWAY_TIMEOUT,
    };

    (
        code,
        Json(DevJobResponse {
            job_id,
            status: job.status,
            results: job.result,
            error: job.error,
            runtime_ms,
        }),
    )
}
