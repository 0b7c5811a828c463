//! Service container: registration, topological build, ordered lifecycle.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{ActionError, ContainerError, Result, UsvcError};
use crate::health::HealthRegistry;
use crate::services::{Dependencies, Service};

struct ServiceEntry {
    service: Arc<dyn Service>,
    any: Arc<dyn Any + Send + Sync>,
}

type BoxedFactory = Box<dyn FnOnce(&ServiceContainer) -> Result<ServiceEntry> + Send + Sync>;

/// Registration record for one service: its name, the services it depends
/// on, and a factory that constructs it once those are built.
pub struct ServiceDescriptor {
    name: String,
    depends_on: Vec<String>,
    factory: BoxedFactory,
}

impl ServiceDescriptor {
    pub fn new<T, F>(name: &str, depends_on: &[&str], factory: F) -> Self
    where
        T: Service,
        F: FnOnce(&ServiceContainer) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let factory: BoxedFactory = Box::new(move |container| {
            let service = factory(container)?;
            Ok(ServiceEntry {
                service: service.clone(),
                any: service,
            })
        });
        Self {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Owns every service instance for the process lifetime. `build` resolves
/// the dependency graph, `initialize`/`teardown` run the lifecycle hooks in
/// topological and reverse order respectively.
pub struct ServiceContainer {
    health: HealthRegistry,
    descriptors: Vec<ServiceDescriptor>,
    entries: HashMap<String, ServiceEntry>,
    init_order: Vec<String>,
}

impl ServiceContainer {
    pub fn new(health: HealthRegistry) -> Self {
        Self {
            health,
            descriptors: Vec::new(),
            entries: HashMap::new(),
            init_order: Vec::new(),
        }
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Queue a service for construction. Names must be unique.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<()> {
        if self.descriptors.iter().any(|d| d.name == descriptor.name) {
            return Err(ContainerError::DuplicateService(descriptor.name).into());
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Construct every registered service in topological order. A
    /// dependency cycle or a reference to an unregistered name is fatal
    /// before the worker runs.
    pub fn build(&mut self) -> Result<()> {
        let descriptors = std::mem::take(&mut self.descriptors);
        let order = topological_order(&descriptors)?;

        let mut slots: Vec<Option<ServiceDescriptor>> = descriptors.into_iter().map(Some).collect();
        for index in order {
            let descriptor = slots[index].take().expect("descriptor consumed twice");
            let name = descriptor.name.clone();
            let entry = (descriptor.factory)(self).map_err(|e| ContainerError::Init {
                service: name.clone(),
                message: e.to_string(),
            })?;
            self.entries.insert(name.clone(), entry);
            self.init_order.push(name);
        }

        info!(services = ?self.init_order, "service container built");
        Ok(())
    }

    /// Run `initialize` on every service in topological order. On the first
    /// failure the already-initialized prefix is cleaned up in reverse
    /// order and the error propagates.
    pub async fn initialize(&self) -> Result<()> {
        let mut initialized: Vec<&str> = Vec::new();
        for name in &self.init_order {
            let entry = &self.entries[name];
            if let Err(e) = entry.service.initialize(&self.health).await {
                error!(service = %name, error = %e, "service initialization failed, rolling back");
                for prior in initialized.into_iter().rev() {
                    if let Err(cleanup_err) = self.entries[prior].service.cleanup().await {
                        warn!(service = %prior, error = %cleanup_err, "cleanup during rollback failed");
                    }
                }
                return Err(ContainerError::Init {
                    service: name.clone(),
                    message: e.to_string(),
                }
                .into());
            }
            initialized.push(name);
        }
        info!(count = self.init_order.len(), "services initialized");
        Ok(())
    }

    /// Run `cleanup` on every service in reverse order. Individual errors
    /// are logged and swallowed so every hook gets its chance.
    pub async fn teardown(&self) {
        for name in self.init_order.iter().rev() {
            if let Err(e) = self.entries[name].service.cleanup().await {
                warn!(service = %name, error = %e, "service cleanup failed");
            }
        }
        info!("service container torn down");
    }

    /// Resolve the named services for a handler invocation, in declared
    /// order. Any missing name fails the whole resolution.
    pub fn resolve(&self, names: &[String]) -> std::result::Result<Dependencies, ActionError> {
        let mut deps = Dependencies::default();
        for name in names {
            let entry = self
                .entries
                .get(name)
                .ok_or_else(|| ActionError::DependencyUnresolved(name.clone()))?;
            deps.insert(name.clone(), entry.any.clone());
        }
        Ok(deps)
    }

    /// Fetch a built service with its concrete type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| UsvcError::from(ContainerError::NotFound(name.to_string())))?;
        entry
            .any
            .clone()
            .downcast::<T>()
            .map_err(|_| ContainerError::NotFound(format!("{name} (type mismatch)")).into())
    }

    /// Names of all built services, in initialization order.
    pub fn service_names(&self) -> &[String] {
        &self.init_order
    }
}

/// Kahn's algorithm over the `depends_on` edges. Ready nodes are visited in
/// registration order, so the result is deterministic.
fn topological_order(descriptors: &[ServiceDescriptor]) -> Result<Vec<usize>> {
    let index_by_name: HashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    let mut indegree = vec![0usize; descriptors.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];

    for (i, descriptor) in descriptors.iter().enumerate() {
        for dep in &descriptor.depends_on {
            let &dep_index = index_by_name.get(dep.as_str()).ok_or_else(|| {
                UsvcError::from(ContainerError::UnknownDependency {
                    service: descriptor.name.clone(),
                    dependency: dep.clone(),
                })
            })?;
            indegree[i] += 1;
            dependents[dep_index].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..descriptors.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(descriptors.len());

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &dependent in &dependents[i] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if order.len() < descriptors.len() {
        let stuck: Vec<String> = (0..descriptors.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| descriptors[i].name.clone())
            .collect();
        return Err(ContainerError::Cycle(stuck).into());
    }

    Ok(order)
}
