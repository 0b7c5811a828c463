//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::health::{HealthSnapshot, HealthStatus};
use crate::web::AppState;

/// `GET /health` — point-in-time snapshot of every registered check plus
/// the aggregate. 200 while the aggregate is GREEN or YELLOW, 503 on RED so
/// load balancers stop routing to the instance.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthSnapshot>) {
    let snapshot = state.health.snapshot();
    state.metrics.set_health_status(snapshot.status);

    let code = if snapshot.status == HealthStatus::Red {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(snapshot))
}
