//! Application orchestrator.
//!
//! Wires configuration, logging, registries, the queue backend, the service
//! container, the HTTP control surface, the optional registry heartbeat,
//! and the worker loop — in that order — and reverses it on shutdown.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::actions::ActionRegistry;
use crate::config::Settings;
use crate::error::{ActionError, Result, UsvcError};
use crate::health::HealthRegistry;
use crate::logging;
use crate::metrics::MetricsCollector;
use crate::queue::{JobQueue, MemoryQueue, SqlQueue};
use crate::registry::{HeartbeatTask, RegistryPublisher};
use crate::services::{Dependencies, ServiceContainer, ServiceDescriptor};
use crate::web::{self, AppState};
use crate::worker::{Worker, WorkerConfig};

/// Builder and runner for one worker process.
///
/// ```no_run
/// use usvc::app::Application;
/// use serde_json::json;
///
/// # async fn example() -> usvc::error::Result<()> {
/// let mut app = Application::from_env()?;
/// app.register_action("ping", None, vec![], |_input, _deps| async move {
///     Ok(json!({"pong": true}))
/// })?;
/// app.run().await
/// # }
/// ```
pub struct Application {
    settings: Settings,
    actions: Arc<ActionRegistry>,
    services: Vec<ServiceDescriptor>,
    publisher: Option<Arc<dyn RegistryPublisher>>,
}

impl Application {
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Settings::from_env()?))
    }

    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            actions: Arc::new(ActionRegistry::new()),
            services: Vec::new(),
            publisher: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Queue a service for the container. Dependencies must be registered
    /// too; order does not matter, the container sorts topologically.
    pub fn register_service(&mut self, descriptor: ServiceDescriptor) -> &mut Self {
        self.services.push(descriptor);
        self
    }

    /// Register an action handler by name.
    pub fn register_action<F, Fut>(
        &mut self,
        name: &str,
        input_schema: Option<Value>,
        dependencies: Vec<String>,
        handler: F,
    ) -> Result<&mut Self>
    where
        F: Fn(Value, Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ActionError>> + Send + 'static,
    {
        self.actions
            .register(name, input_schema, dependencies, handler)?;
        Ok(self)
    }

    /// Wire a fleet registry backend. The heartbeat only runs when the
    /// registry is also enabled by configuration.
    pub fn with_registry_publisher(&mut self, publisher: Arc<dyn RegistryPublisher>) -> &mut Self {
        self.publisher = Some(publisher);
        self
    }

    /// Run until SIGINT/SIGTERM, then shut down gracefully. Exit is clean
    /// (`Ok`) on a signal-driven shutdown; configuration and wiring errors
    /// surface before any job is accepted.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let signal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received, initiating graceful shutdown");
            let _ = signal_tx.send(true);
        });

        self.run_until(shutdown_rx).await
    }

    /// Run until the given shutdown signal flips to true. Used by `run` and
    /// directly by tests and embedders that manage their own lifecycle.
    pub async fn run_until(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        logging::init(&self.settings);

        info!(
            service = %self.settings.microservice_name,
            version = %self.settings.service_version,
            dev_mode = self.settings.dev_mode,
            "🚀 starting worker application"
        );

        if self.actions.is_empty() {
            return Err(UsvcError::Configuration(
                "no actions registered; register at least one action before run()".to_string(),
            ));
        }

        let health = HealthRegistry::new();
        let metrics = MetricsCollector::new()?;

        // Queue backend per mode.
        let dev_queue = self.settings.dev_mode.then(MemoryQueue::new);
        let queue: Arc<dyn JobQueue> = match &dev_queue {
            Some(memory) => memory.clone(),
            None => Arc::new(
                SqlQueue::connect(
                    &self.settings.queue_db,
                    self.settings.max_concurrent_jobs as u32 + 1,
                )
                .await?,
            ),
        };
        health.register("job_queue");

        // Services: build and initialize in dependency order. Failures here
        // are fatal; nothing has been claimed yet.
        let mut container = ServiceContainer::new(health.clone());
        for descriptor in self.services {
            container.register(descriptor)?;
        }
        container.build()?;
        container.initialize().await?;
        let container = Arc::new(container);

        // HTTP control surface. Bind errors abort startup.
        let listener = web::bind(&self.settings.http_bind_address()).await?;
        let state = Arc::new(AppState {
            service_name: self.settings.microservice_name.clone(),
            health: health.clone(),
            metrics: metrics.clone(),
            dev_queue: dev_queue.clone(),
            job_timeout: self.settings.job_timeout,
        });
        let web_handle = tokio::spawn(web::serve_on(listener, state, shutdown.clone()));

        // Optional fleet registry heartbeat.
        let heartbeat_handle = match (&self.publisher, self.settings.registry_enabled()) {
            (Some(publisher), true) => Some(
                HeartbeatTask::new(publisher.clone(), &self.settings, &self.actions, health.clone())
                    .spawn(shutdown.clone()),
            ),
            (None, true) => {
                warn!("MONGODB_URI is set but no registry publisher is wired; skipping heartbeat");
                None
            }
            _ => None,
        };

        info!(
            actions = ?self.actions.names(),
            services = ?container.service_names(),
            "application started, entering worker loop"
        );

        // The worker loop blocks until shutdown and drains in-flight jobs.
        let worker = Worker::new(
            WorkerConfig::from_settings(&self.settings),
            queue.clone(),
            self.actions.clone(),
            container.clone(),
            health.clone(),
            metrics.clone(),
            shutdown.clone(),
        );
        worker.run().await;

        // Teardown mirrors startup in reverse.
        if let Some(handle) = heartbeat_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "registry heartbeat task panicked");
            }
        }
        container.teardown().await;
        if let Err(e) = queue.shutdown().await {
            warn!(error = %e, "queue shutdown failed");
        }
        match web_handle.await {
            Ok(Err(e)) => error!(error = %e, "HTTP server terminated with error"),
            Err(e) => warn!(error = %e, "HTTP server task panicked"),
            Ok(Ok(())) => {}
        }

        info!("✅ application shut down");
        Ok(())
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
