//! Standalone worker server.
//!
//! Thin wrapper binary for running a usvc worker from environment
//! configuration alone. Ships a single built-in `ping` action so a dev-mode
//! instance answers `/dev/job` out of the box; real deployments embed the
//! library and register their own actions and services.
//!
//! ```bash
//! MICROSERVICE_NAME=demo DEV_MODE=true cargo run --bin usvc-server
//! ```

use serde_json::json;
use tracing::info;

use usvc::Application;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut app = Application::from_env()?;
    usvc::logging::init(app.settings());

    info!(version = usvc::VERSION, "usvc server starting");

    app.register_action("ping", None, vec![], |_input, _deps| async move {
        Ok(json!({"pong": true}))
    })?;

    app.run().await?;
    Ok(())
}
