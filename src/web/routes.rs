//! Route definitions for the control surface.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::web::{handlers, AppState};

/// Build the router. `/dev/job` is wired only when the dev queue is
/// present.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::prometheus_metrics));

    if state.dev_queue.is_some() {
        router = router.route("/dev/job", post(handlers::dev::submit_job));
    }

    router.with_state(state)
}
