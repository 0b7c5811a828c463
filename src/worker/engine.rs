//! The job-processing engine.
//!
//! A single producer loop claims batches of Ready jobs and spawns one
//! dispatch task per job. Concurrency is bounded by a semaphore sized to
//! `max_concurrent_jobs`; the poll batch size is always the number of free
//! permits, so `active_jobs` can never exceed the budget. Each dispatch
//! races the handler against the per-job timeout and the shutdown
//! cancellation signal, then drives the job to its terminal state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::config::Settings;
use crate::error::QueueError;
use crate::health::{HealthRegistry, HealthStatus};
use crate::metrics::MetricsCollector;
use crate::queue::{Job, JobError, JobQueue};
use crate::services::ServiceContainer;

/// Engine tuning; see the corresponding environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Claim identity written into `claimed_by`.
    pub worker_id: String,
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub job_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            worker_id: format!("{}-{}", settings.microservice_name, Uuid::new_v4()),
            poll_interval: settings.polling_interval,
            max_concurrent_jobs: settings.max_concurrent_jobs,
            job_timeout: settings.job_timeout,
            shutdown_timeout: settings.shutdown_timeout,
        }
    }
}

/// Shared handles cloned into each dispatch task.
#[derive(Clone)]
struct JobContext {
    queue: Arc<dyn JobQueue>,
    actions: Arc<ActionRegistry>,
    container: Arc<ServiceContainer>,
    health: HealthRegistry,
    metrics: MetricsCollector,
    job_timeout: Duration,
    cancel: watch::Receiver<bool>,
}

/// The worker engine. Owns the poll loop; dispatch tasks run on the same
/// runtime under the shared semaphore.
pub struct Worker {
    config: WorkerConfig,
    context: JobContext,
    shutdown: watch::Receiver<bool>,
    cancel: watch::Sender<bool>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        actions: Arc<ActionRegistry>,
        container: Arc<ServiceContainer>,
        health: HealthRegistry,
        metrics: MetricsCollector,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        health.register("job_queue");
        let (cancel, cancel_rx) = watch::channel(false);
        Self {
            context: JobContext {
                queue,
                actions,
                container,
                health,
                metrics,
                job_timeout: config.job_timeout,
                cancel: cancel_rx,
            },
            config,
            shutdown,
            cancel,
        }
    }

    /// Run until a shutdown signal arrives, then drain in-flight jobs for
    /// up to `shutdown_timeout` and cancel whatever remains. Cancelled jobs
    /// are failed with `SHUTDOWN_INTERRUPTED`.
    pub async fn run(mut self) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let mut tasks: JoinSet<()> = JoinSet::new();

        info!(
            worker_id = %self.config.worker_id,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            "worker loop started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            // Reap finished dispatch tasks so the JoinSet stays small.
            while tasks.try_join_next().is_some() {}

            let free = semaphore.available_permits();
            if free == 0 {
                // At capacity: wait for a slot or the shutdown signal.
                let sem = semaphore.clone();
                tokio::select! {
                    changed = self.shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    permit = sem.acquire_owned() => {
                        drop(permit);
                    }
                }
                continue;
            }

            match self.context.queue.poll(free, &self.config.worker_id).await {
                Err(error) => {
                    warn!(
                        event = "poll_failed",
                        error_code = error.error_code(),
                        error_message = %error,
                        "queue poll failed, retrying after interval"
                    );
                    self.record_queue_error(&error);
                    if self.sleep_or_shutdown().await {
                        break;
                    }
                }
                Ok(jobs) => {
                    let _ = self.context.health.update(
                        "job_queue",
                        HealthStatus::Green,
                        object_details(json!({"last_poll": "ok"})),
                    );
                    if jobs.is_empty() {
                        if self.sleep_or_shutdown().await {
                            break;
                        }
                        continue;
                    }
                    for job in jobs {
                        // Permits are free by construction: batch size was
                        // the free permit count and only this loop acquires.
                        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                            break;
                        };
                        self.context.metrics.active_jobs.inc();
                        tasks.spawn(dispatch_job(job, permit, self.context.clone()));
                    }
                }
            }
        }

        let in_flight = self.config.max_concurrent_jobs - semaphore.available_permits();
        info!(in_flight = in_flight, "worker draining in-flight jobs");

        let drained = timeout(self.config.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs_f64(),
                "shutdown timeout reached, cancelling remaining jobs"
            );
            let _ = self.cancel.send(true);
            while tasks.join_next().await.is_some() {}
        }

        info!("worker loop stopped");
    }

    fn record_queue_error(&self, error: &QueueError) {
        let _ = self.context.health.update(
            "job_queue",
            HealthStatus::Red,
            object_details(json!({
                "error_code": error.error_code(),
                "error": error.to_string(),
            })),
        );
    }

    /// Sleep one poll interval, waking early on shutdown. Returns true when
    /// shutdown was requested. A closed channel counts as shutdown.
    async fn sleep_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = sleep(self.config.poll_interval) => false,
            _ = self.shutdown.wait_for(|stop| *stop) => true,
        }
    }
}

/// Process one claimed job to its terminal state. Runs inside a span whose
/// `token` field is the job id, so every log record emitted below carries
/// the correlation token.
async fn dispatch_job(job: Job, permit: OwnedSemaphorePermit, mut ctx: JobContext) {
    let span = info_span!("process_job", token = %job.id);
    async move {
        let started = Instant::now();
        let parent_token = job.payload.get("parent_token").and_then(Value::as_str);
        info!(
            event = "job_started",
            attempts = job.attempts,
            parent_token = parent_token,
            "processing job"
        );

        if let Err(error) = ctx.queue.mark_processing(&job.id).await {
            // Leave the claim as-is: the row stays Assigned and is either
            // recovered on reconnect or aged out by backend policy.
            warn!(
                event = "mark_processing_failed",
                error_code = error.error_code(),
                error_message = %error,
                "abandoning job after claim"
            );
            let _ = ctx.health.update(
                "job_queue",
                HealthStatus::Red,
                object_details(json!({
                    "error_code": error.error_code(),
                    "error": error.to_string(),
                })),
            );
            ctx.metrics.active_jobs.dec();
            drop(permit);
            return;
        }

        let outcome: Result<Value, JobError> = tokio::select! {
            result = ctx.actions.dispatch(job.payload.clone(), &ctx.container) => {
                result.map_err(|e| JobError::from(&e))
            }
            _ = sleep(ctx.job_timeout) => Err(JobError::timeout(ctx.job_timeout)),
            _ = cancelled(&mut ctx.cancel) => Err(JobError::shutdown_interrupted()),
        };

        let runtime_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => match ctx.queue.complete(&job.id, result).await {
                Ok(()) => {
                    ctx.metrics.jobs_processed_total.inc();
                    info!(event = "job_completed", runtime_ms = runtime_ms, "job completed");
                }
                Err(error) => {
                    warn!(
                        event = "job_complete_failed",
                        error_code = error.error_code(),
                        error_message = %error,
                        "failed to persist job completion"
                    );
                }
            },
            Err(job_error) => {
                warn!(
                    event = "job_failed",
                    error_code = %job_error.error_code,
                    error_message = %job_error.error_message,
                    runtime_ms = runtime_ms,
                    "job failed"
                );
                if let Err(error) = ctx.queue.fail(&job.id, job_error).await {
                    warn!(
                        event = "job_fail_failed",
                        error_code = error.error_code(),
                        error_message = %error,
                        "failed to persist job failure"
                    );
                }
                ctx.metrics.jobs_errors_total.inc();
            }
        }

        ctx.metrics.active_jobs.dec();
        drop(permit);
    }
    .instrument(span)
    .await
}

/// Resolves when the hard-cancel signal fires; never resolves otherwise.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn object_details(value: Value) -> Option<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
