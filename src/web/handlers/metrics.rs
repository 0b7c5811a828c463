//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use tracing::debug;

use crate::web::AppState;

/// `GET /metrics` — Prometheus text exposition format.
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("serving Prometheus metrics");

    // Refresh the health gauge so scrapes see the current aggregate.
    state.metrics.set_health_status(state.health.aggregate());

    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.metrics.content_type())],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
