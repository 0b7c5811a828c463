//! Fleet-wide service registry: fire-and-forget heartbeat publication.
//!
//! The concrete registry backend (the original deployment uses MongoDB) is
//! external; this module owns the seam. A [`RegistryPublisher`]
//! implementation receives the service schema once at startup and an
//! instance record on every heartbeat. Publisher failures mark the
//! `service_registry` health check RED and are otherwise swallowed — the
//! worker keeps processing jobs without a registry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::config::Settings;
use crate::error::Result;
use crate::health::{HealthRegistry, HealthStatus};

pub const REGISTRY_CHECK: &str = "service_registry";

/// Action schema advertised to the fleet.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSchema {
    pub name: String,
    pub input_schema: Option<Value>,
}

/// Service-level schema document, published once per version.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSchema {
    pub service_name: String,
    pub service_version: String,
    pub actions: Vec<ActionSchema>,
    pub published_at: DateTime<Utc>,
}

/// Instance metadata refreshed on every heartbeat. Instances missing a few
/// heartbeats age out via the backend's TTL.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub service_name: String,
    pub service_version: String,
    pub host: String,
    pub port: u16,
    pub health_status: HealthStatus,
    pub health_checks: Value,
    pub last_heartbeat: DateTime<Utc>,
}

/// Backend seam for the fleet registry.
#[async_trait]
pub trait RegistryPublisher: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn publish_schema(&self, schema: &ServiceSchema) -> Result<()>;
    async fn heartbeat(&self, instance: &InstanceRecord) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

/// Periodic heartbeat loop around any publisher.
pub struct HeartbeatTask {
    publisher: Arc<dyn RegistryPublisher>,
    health: HealthRegistry,
    schema: ServiceSchema,
    instance_id: String,
    host: String,
    port: u16,
    period: std::time::Duration,
}

impl HeartbeatTask {
    pub fn new(
        publisher: Arc<dyn RegistryPublisher>,
        settings: &Settings,
        actions: &ActionRegistry,
        health: HealthRegistry,
    ) -> Self {
        let schema = ServiceSchema {
            service_name: settings.microservice_name.clone(),
            service_version: settings.service_version.clone(),
            actions: actions
                .schemas()
                .into_iter()
                .map(|(name, input_schema)| ActionSchema { name, input_schema })
                .collect(),
            published_at: Utc::now(),
        };
        Self {
            publisher,
            health,
            schema,
            instance_id: Uuid::new_v4().to_string(),
            host: settings.http_host.clone(),
            port: settings.http_port,
            period: settings.registry.heartbeat_interval,
        }
    }

    /// Connect, publish the schema, then heartbeat until shutdown. All
    /// failures degrade gracefully: the check goes RED, the loop keeps
    /// trying.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.health.register(REGISTRY_CHECK);

            if let Err(e) = self.publisher.connect().await {
                warn!(error = %e, "registry connect failed, continuing without registry");
                self.mark(HealthStatus::Red, &e.to_string());
            } else if let Err(e) = self.publisher.publish_schema(&self.schema).await {
                warn!(error = %e, "registry schema publication failed");
                self.mark(HealthStatus::Red, &e.to_string());
            }

            let mut ticker = interval(self.period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.beat().await;
                    }
                    Ok(()) = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            if let Err(e) = self.publisher.disconnect().await {
                warn!(error = %e, "registry disconnect failed");
            }
            debug!("registry heartbeat stopped");
        })
    }

    async fn beat(&self) {
        let snapshot = self.health.snapshot();
        let record = InstanceRecord {
            instance_id: self.instance_id.clone(),
            service_name: self.schema.service_name.clone(),
            service_version: self.schema.service_version.clone(),
            host: self.host.clone(),
            port: self.port,
            health_status: snapshot.status,
            health_checks: serde_json::to_value(&snapshot.checks).unwrap_or(Value::Null),
            last_heartbeat: Utc::now(),
        };
        match self.publisher.heartbeat(&record).await {
            Ok(()) => self.mark(HealthStatus::Green, "ok"),
            Err(e) => {
                warn!(error = %e, "registry heartbeat failed");
                self.mark(HealthStatus::Red, &e.to_string());
            }
        }
    }

    fn mark(&self, status: HealthStatus, detail: &str) {
        let mut details = serde_json::Map::new();
        details.insert("last_heartbeat".to_string(), Value::String(detail.to_string()));
        let _ = self.health.update(REGISTRY_CHECK, status, Some(details));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UsvcError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakePublisher {
        heartbeats: AtomicUsize,
        schemas: AtomicUsize,
        fail_heartbeat: AtomicBool,
    }

    #[async_trait]
    impl RegistryPublisher for FakePublisher {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn publish_schema(&self, _schema: &ServiceSchema) -> Result<()> {
            self.schemas.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn heartbeat(&self, _instance: &InstanceRecord) -> Result<()> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            if self.fail_heartbeat.load(Ordering::SeqCst) {
                return Err(UsvcError::Registry("registry down".to_string()));
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    fn dev_settings() -> Settings {
        let vars = HashMap::from([
            ("MICROSERVICE_NAME".to_string(), "hb-test".to_string()),
            ("DEV_MODE".to_string(), "true".to_string()),
            ("MONGODB_HEARTBEAT_SECONDS".to_string(), "0.01".to_string()),
        ]);
        Settings::from_vars(&vars).unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat_publishes_and_goes_green() {
        let publisher = Arc::new(FakePublisher::default());
        let health = HealthRegistry::new();
        let actions = ActionRegistry::new();
        let task = HeartbeatTask::new(publisher.clone(), &dev_settings(), &actions, health.clone());

        let (tx, rx) = watch::channel(false);
        let handle = task.spawn(rx);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(publisher.schemas.load(Ordering::SeqCst), 1);
        assert!(publisher.heartbeats.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            health.snapshot().checks[REGISTRY_CHECK].status,
            HealthStatus::Green
        );
    }

    #[tokio::test]
    async fn test_heartbeat_failure_degrades_gracefully() {
        let publisher = Arc::new(FakePublisher::default());
        publisher.fail_heartbeat.store(true, Ordering::SeqCst);
        let health = HealthRegistry::new();
        let actions = ActionRegistry::new();
        let task = HeartbeatTask::new(publisher.clone(), &dev_settings(), &actions, health.clone());

        let (tx, rx) = watch::channel(false);
        let handle = task.spawn(rx);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // The registry check is RED but the process is unaffected.
        assert_eq!(
            health.snapshot().checks[REGISTRY_CHECK].status,
            HealthStatus::Red
        );

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
