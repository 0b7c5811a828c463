//! HTTP control surface: `/health`, `/metrics`, and the dev-mode
//! `/dev/job` endpoint.

pub mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::error::{Result, UsvcError};

pub use routes::router;
pub use state::AppState;

/// Bind the control surface listener. Separate from [`serve_on`] so a bad
/// bind address fails startup before the worker accepts any job.
pub async fn bind(bind_address: &str) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| UsvcError::Http(format!("bind {bind_address} failed: {e}")))
}

/// Serve the control surface until the shutdown signal fires.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|e| UsvcError::Http(e.to_string()))?;
    info!(address = %local, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| UsvcError::Http(e.to_string()))
}
