//! Structured logging initialization.
//!
//! Console output is pretty-printed for development and JSON when
//! `LOG_CONSOLE_JSON` is set, matching what log shippers expect in
//! production. Job dispatch binds the correlation token onto a span, so
//! every record emitted while a job runs carries `token = <job id>`.

use std::sync::OnceLock;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Settings;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber. Idempotent; a subscriber
/// installed by the embedding process wins.
pub fn init(settings: &Settings) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let default_level = if settings.debug { "debug" } else { "info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

        let registry = tracing_subscriber::registry().with(filter);

        let init_result = if settings.log_console_json {
            registry
                .with(fmt::layer().json().with_target(true).flatten_event(true))
                .try_init()
        } else {
            registry.with(fmt::layer().with_target(true)).try_init()
        };

        if init_result.is_err() {
            tracing::debug!("global tracing subscriber already installed");
        }

        info!(
            service = %settings.microservice_name,
            version = %settings.service_version,
            json_console = settings.log_console_json,
            "logging initialized"
        );

        if let Some(endpoint) = &settings.otel.logs_endpoint {
            info!(endpoint = %endpoint, "OTLP log export configured");
        }
        if let Some(endpoint) = &settings.otel.traces_endpoint {
            info!(endpoint = %endpoint, "OTLP trace export configured");
        }
    });
}
