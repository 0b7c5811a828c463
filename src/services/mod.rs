//! Long-lived services: the container that owns them and the resilient
//! REST API client template.

mod container;
mod rest_api;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ActionError, Result};
use crate::health::HealthRegistry;

pub use container::{ServiceContainer, ServiceDescriptor};
pub use rest_api::{RestApiClient, RestApiConfig};

/// A long-lived dependency injected into action handlers.
///
/// Capability is a set of methods, not a class tree: anything that carries
/// a name and the two lifecycle hooks can live in the container.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Unique service name; also the conventional health check name.
    fn name(&self) -> &str;

    /// Called once at startup, in dependency order. The bound health
    /// registry is handed in so the service can register its checks.
    async fn initialize(&self, health: &HealthRegistry) -> Result<()> {
        let _ = health;
        Ok(())
    }

    /// Called once at shutdown, in reverse dependency order.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Services resolved for one handler invocation, in declared order.
#[derive(Clone, Default)]
pub struct Dependencies {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Dependencies {
    pub(crate) fn insert(&mut self, name: String, service: Arc<dyn Any + Send + Sync>) {
        self.services.insert(name, service);
    }

    /// Fetch a dependency by name with its concrete type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> std::result::Result<Arc<T>, ActionError> {
        let service = self
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::DependencyUnresolved(name.to_string()))?;
        service.downcast::<T>().map_err(|_| {
            ActionError::DependencyUnresolved(format!("service {name} has an unexpected type"))
        })
    }
}
