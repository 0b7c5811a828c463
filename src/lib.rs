//! # usvc
//!
//! Job-processing microservice worker library. The engine atomically claims
//! jobs from a durable queue, dispatches them to typed action handlers
//! under a concurrency budget, and exposes operational health and metrics
//! over HTTP.
//!
//! ## Architecture
//!
//! - [`queue`] — backend-polymorphic job queue (durable SQL, in-memory dev)
//! - [`actions`] — name → handler registry with schema validation
//! - [`services`] — dependency container and the resilient REST API client
//! - [`worker`] — poll loop, bounded dispatch, timeouts, shutdown drain
//! - [`resilience`] — circuit breaker and token-bucket rate limiter
//! - [`health`] / [`metrics`] — three-tier health aggregation, Prometheus
//! - [`web`] — `/health`, `/metrics`, dev-mode `/dev/job`
//! - [`registry`] — optional fleet heartbeat publisher seam
//! - [`app`] — the orchestrator wiring all of the above

pub mod actions;
pub mod app;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod resilience;
pub mod services;
pub mod web;
pub mod worker;

pub use actions::ActionRegistry;
pub use app::Application;
pub use config::Settings;
pub use error::{Result, UsvcError};
pub use health::{HealthRegistry, HealthStatus};
pub use metrics::MetricsCollector;
pub use queue::{Job, JobError, JobQueue, JobStatus, MemoryQueue, SqlQueue};
pub use services::{Dependencies, RestApiClient, RestApiConfig, Service, ServiceContainer, ServiceDescriptor};
pub use worker::{Worker, WorkerConfig};

/// Crate version, surfaced in logs and the dev status endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
