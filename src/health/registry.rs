//! Thread-safe registry of named health checks.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, UsvcError};
use crate::health::HealthStatus;

/// One registered check: status, free-form details, and update time.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub details: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl HealthCheck {
    fn green() -> Self {
        Self {
            status: HealthStatus::Green,
            details: Map::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Point-in-time view served by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, HealthCheck>,
}

/// Shared map of named checks. Cloning hands out another handle onto the
/// same underlying state; all operations are serialized through one lock so
/// readers never observe a partial update.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    checks: Arc<RwLock<BTreeMap<String, HealthCheck>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry at GREEN with empty details. Re-registering an
    /// existing name leaves its current state untouched.
    pub fn register(&self, name: &str) {
        let mut checks = self.checks.write().expect("health registry lock poisoned");
        checks.entry(name.to_string()).or_insert_with(HealthCheck::green);
    }

    /// Overwrite a check's status and details. Unregistered names are
    /// rejected so a typo cannot silently create a new check.
    pub fn update(
        &self,
        name: &str,
        status: HealthStatus,
        details: Option<Map<String, Value>>,
    ) -> Result<()> {
        let mut checks = self.checks.write().expect("health registry lock poisoned");
        let check = checks
            .get_mut(name)
            .ok_or_else(|| UsvcError::UnknownHealthCheck(name.to_string()))?;
        check.status = status;
        check.details = details.unwrap_or_default();
        check.updated_at = Utc::now();
        Ok(())
    }

    /// Aggregate status: minimum over all checks, GREEN for an empty
    /// registry.
    pub fn aggregate(&self) -> HealthStatus {
        let checks = self.checks.read().expect("health registry lock poisoned");
        checks
            .values()
            .map(|c| c.status)
            .min()
            .unwrap_or(HealthStatus::Green)
    }

    /// Point-in-time copy of every check plus the aggregate.
    pub fn snapshot(&self) -> HealthSnapshot {
        let checks = self.checks.read().expect("health registry lock poisoned");
        let status = checks
            .values()
            .map(|c| c.status)
            .min()
            .unwrap_or(HealthStatus::Green);
        HealthSnapshot {
            status,
            timestamp: Utc::now(),
            checks: checks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details(pairs: &[(&str, Value)]) -> Option<Map<String, Value>> {
        let mut map = Map::new();
        for (key, value) in pairs {
            map.insert((*key).to_string(), value.clone());
        }
        Some(map)
    }

    #[test]
    fn test_empty_registry_is_green() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.aggregate(), HealthStatus::Green);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.status, HealthStatus::Green);
        assert!(snapshot.checks.is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = HealthRegistry::new();
        registry.register("job_queue");
        registry
            .update("job_queue", HealthStatus::Red, details(&[("error", json!("down"))]))
            .unwrap();

        // A second register must not reset the RED status.
        registry.register("job_queue");
        assert_eq!(registry.aggregate(), HealthStatus::Red);
    }

    #[test]
    fn test_update_unregistered_name_is_rejected() {
        let registry = HealthRegistry::new();
        let err = registry
            .update("nope", HealthStatus::Green, None)
            .unwrap_err();
        assert!(matches!(err, UsvcError::UnknownHealthCheck(name) if name == "nope"));
    }

    #[test]
    fn test_aggregate_is_minimum() {
        let registry = HealthRegistry::new();
        registry.register("a");
        registry.register("b");
        registry.register("c");
        registry.update("b", HealthStatus::Yellow, None).unwrap();
        assert_eq!(registry.aggregate(), HealthStatus::Yellow);

        registry.update("c", HealthStatus::Red, None).unwrap();
        assert_eq!(registry.aggregate(), HealthStatus::Red);

        registry.update("c", HealthStatus::Green, None).unwrap();
        registry.update("b", HealthStatus::Green, None).unwrap();
        assert_eq!(registry.aggregate(), HealthStatus::Green);
    }

    #[test]
    fn test_snapshot_carries_details() {
        let registry = HealthRegistry::new();
        registry.register("payment_api");
        registry
            .update(
                "payment_api",
                HealthStatus::Yellow,
                details(&[("attempt", json!(2))]),
            )
            .unwrap();

        let snapshot = registry.snapshot();
        let check = &snapshot.checks["payment_api"];
        assert_eq!(check.status, HealthStatus::Yellow);
        assert_eq!(check.details["attempt"], json!(2));
        assert_eq!(snapshot.status, HealthStatus::Yellow);
    }

    #[test]
    fn test_clone_shares_state() {
        let registry = HealthRegistry::new();
        let handle = registry.clone();
        handle.register("shared");
        handle.update("shared", HealthStatus::Red, None).unwrap();
        assert_eq!(registry.aggregate(), HealthStatus::Red);
    }
}
