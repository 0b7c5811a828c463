//! Metrics collection rendered in Prometheus text exposition format.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{Result, UsvcError};
use crate::health::HealthStatus;

/// User-registered metric handle.
#[derive(Clone)]
enum CustomMetric {
    Counter(IntCounter),
    Gauge(IntGauge),
}

/// Counter/gauge store for the worker. Core series are created up front;
/// services can register additional counters and gauges by name.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    pub jobs_processed_total: IntCounter,
    pub jobs_errors_total: IntCounter,
    pub active_jobs: IntGauge,
    pub health_status: IntGauge,
    custom: Arc<RwLock<HashMap<String, CustomMetric>>>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let jobs_processed_total = IntCounter::new(
            "jobs_processed_total",
            "Total number of jobs completed successfully",
        )
        .map_err(|e| UsvcError::Metrics(e.to_string()))?;

        let jobs_errors_total = IntCounter::new(
            "jobs_errors_total",
            "Total number of jobs that terminated in failure",
        )
        .map_err(|e| UsvcError::Metrics(e.to_string()))?;

        let active_jobs = IntGauge::new("active_jobs", "Number of jobs currently in flight")
            .map_err(|e| UsvcError::Metrics(e.to_string()))?;

        let health_status = IntGauge::new(
            "health_status",
            "Aggregate health status (0=RED, 1=YELLOW, 2=GREEN)",
        )
        .map_err(|e| UsvcError::Metrics(e.to_string()))?;
        health_status.set(HealthStatus::Green.as_gauge());

        for collector in [&jobs_processed_total, &jobs_errors_total] {
            registry
                .register(Box::new(collector.clone()))
                .map_err(|e| UsvcError::Metrics(e.to_string()))?;
        }
        for collector in [&active_jobs, &health_status] {
            registry
                .register(Box::new(collector.clone()))
                .map_err(|e| UsvcError::Metrics(e.to_string()))?;
        }

        Ok(Self {
            registry,
            jobs_processed_total,
            jobs_errors_total,
            active_jobs,
            health_status,
            custom: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Register a user counter. Duplicate names are rejected.
    pub fn register_counter(&self, name: &str, help: &str) -> Result<IntCounter> {
        let counter =
            IntCounter::new(name, help).map_err(|e| UsvcError::Metrics(e.to_string()))?;
        self.registry
            .register(Box::new(counter.clone()))
            .map_err(|e| UsvcError::Metrics(e.to_string()))?;
        self.custom
            .write()
            .expect("metrics lock poisoned")
            .insert(name.to_string(), CustomMetric::Counter(counter.clone()));
        Ok(counter)
    }

    /// Register a user gauge. Duplicate names are rejected.
    pub fn register_gauge(&self, name: &str, help: &str) -> Result<IntGauge> {
        let gauge = IntGauge::new(name, help).map_err(|e| UsvcError::Metrics(e.to_string()))?;
        self.registry
            .register(Box::new(gauge.clone()))
            .map_err(|e| UsvcError::Metrics(e.to_string()))?;
        self.custom
            .write()
            .expect("metrics lock poisoned")
            .insert(name.to_string(), CustomMetric::Gauge(gauge.clone()));
        Ok(gauge)
    }

    /// Look up a previously registered user counter.
    pub fn counter(&self, name: &str) -> Option<IntCounter> {
        match self.custom.read().expect("metrics lock poisoned").get(name) {
            Some(CustomMetric::Counter(c)) => Some(c.clone()),
            _ => None,
        }
    }

    /// Look up a previously registered user gauge.
    pub fn gauge(&self, name: &str) -> Option<IntGauge> {
        match self.custom.read().expect("metrics lock poisoned").get(name) {
            Some(CustomMetric::Gauge(g)) => Some(g.clone()),
            _ => None,
        }
    }

    /// Mirror the aggregate health status into the `health_status` gauge.
    pub fn set_health_status(&self, status: HealthStatus) {
        self.health_status.set(status.as_gauge());
    }

    /// Render all series in the Prometheus text exposition format,
    /// including `# HELP` and `# TYPE` lines.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .map_err(|e| UsvcError::Metrics(e.to_string()))
    }

    /// Content type for the `/metrics` endpoint.
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_core_series() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.jobs_processed_total.inc();
        metrics.jobs_errors_total.inc_by(2);
        metrics.active_jobs.set(3);

        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("# HELP jobs_processed_total"));
        assert!(rendered.contains("# TYPE jobs_processed_total counter"));
        assert!(rendered.contains("jobs_processed_total 1"));
        assert!(rendered.contains("# TYPE jobs_errors_total counter"));
        assert!(rendered.contains("jobs_errors_total 2"));
        assert!(rendered.contains("# TYPE active_jobs gauge"));
        assert!(rendered.contains("active_jobs 3"));
        assert!(rendered.contains("# TYPE health_status gauge"));
        assert!(rendered.contains("health_status 2"));
    }

    #[test]
    fn test_counters_are_monotonic_across_renders() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.jobs_processed_total.inc();
        let first = metrics.render().unwrap();
        metrics.jobs_processed_total.inc();
        let second = metrics.render().unwrap();
        assert!(first.contains("jobs_processed_total 1"));
        assert!(second.contains("jobs_processed_total 2"));
    }

    #[test]
    fn test_custom_metrics_registration() {
        let metrics = MetricsCollector::new().unwrap();
        let counter = metrics
            .register_counter("payments_charged_total", "Charges issued")
            .unwrap();
        counter.inc();

        assert!(metrics.counter("payments_charged_total").is_some());
        assert!(metrics.gauge("payments_charged_total").is_none());
        assert!(metrics.render().unwrap().contains("payments_charged_total 1"));

        // Same name twice is rejected by the underlying registry.
        assert!(metrics
            .register_counter("payments_charged_total", "Charges issued")
            .is_err());
    }

    #[test]
    fn test_health_status_gauge_tracks_aggregate() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.set_health_status(HealthStatus::Red);
        assert!(metrics.render().unwrap().contains("health_status 0"));
        metrics.set_health_status(HealthStatus::Yellow);
        assert!(metrics.render().unwrap().contains("health_status 1"));
    }

    #[test]
    fn test_content_type_is_prometheus_text() {
        let metrics = MetricsCollector::new().unwrap();
        assert_eq!(metrics.content_type(), "text/plain; version=0.0.4");
    }
}
