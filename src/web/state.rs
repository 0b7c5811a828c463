//! Shared state for the HTTP control surface.

use std::sync::Arc;
use std::time::Duration;

use crate::health::HealthRegistry;
use crate::metrics::MetricsCollector;
use crate::queue::MemoryQueue;

/// Handles the HTTP handlers need. `dev_queue` is populated only in dev
/// mode; its presence is what turns the `/dev/job` route on.
#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub health: HealthRegistry,
    pub metrics: MetricsCollector,
    pub dev_queue: Option<Arc<MemoryQueue>>,
    pub job_timeout: Duration,
}
