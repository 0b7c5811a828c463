//! HTTP control surface: /health, /metrics, and the dev-mode /dev/job flow.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use usvc::actions::ActionRegistry;
use usvc::health::{HealthRegistry, HealthStatus};
use usvc::metrics::MetricsCollector;
use usvc::queue::MemoryQueue;
use usvc::services::ServiceContainer;
use usvc::web::{self, AppState};
use usvc::worker::{Worker, WorkerConfig};

struct WebHarness {
    base_url: String,
    health: HealthRegistry,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    server: JoinHandle<usvc::error::Result<()>>,
}

impl WebHarness {
    /// Full dev-mode stack: in-memory queue, worker loop, HTTP server on an
    /// ephemeral port.
    async fn start(actions: ActionRegistry) -> Self {
        let queue = MemoryQueue::new();
        let health = HealthRegistry::new();
        let metrics = MetricsCollector::new().unwrap();
        let container = Arc::new(ServiceContainer::new(health.clone()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = Worker::new(
            WorkerConfig {
                worker_id: "web-test-worker".to_string(),
                poll_interval: Duration::from_millis(20),
                max_concurrent_jobs: 4,
                job_timeout: Duration::from_secs(2),
                shutdown_timeout: Duration::from_secs(2),
            },
            queue.clone(),
            Arc::new(actions),
            container,
            health.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        );
        let worker = tokio::spawn(worker.run());

        let listener = web::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState {
            service_name: "web-test".to_string(),
            health: health.clone(),
            metrics,
            dev_queue: Some(queue),
            job_timeout: Duration::from_secs(2),
        });
        let server = tokio::spawn(web::serve_on(listener, state, shutdown_rx));

        Self {
            base_url: format!("http://{addr}"),
            health,
            shutdown,
            worker,
            server,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.worker.await;
        let _ = self.server.await;
    }
}

fn demo_actions() -> ActionRegistry {
    let actions = ActionRegistry::new();
    actions
        .register(
            "greet",
            Some(json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            })),
            vec![],
            |input, _deps| async move {
                let name = input["name"].as_str().unwrap_or_default().to_string();
                Ok(json!({"message": format!("Hello, {name}!")}))
            },
        )
        .unwrap();
    actions
}

#[tokio::test]
async fn test_health_endpoint_reports_checks() {
    let harness = WebHarness::start(demo_actions()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", harness.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "GREEN");
    assert!(body["checks"]["job_queue"].is_object());
    assert!(body["timestamp"].is_string());

    harness.stop().await;
}

#[tokio::test]
async fn test_health_endpoint_returns_503_when_red() {
    let harness = WebHarness::start(demo_actions()).await;
    harness.health.register("payment_api");
    harness
        .health
        .update("payment_api", HealthStatus::Red, None)
        .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", harness.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 503);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "RED");
    assert_eq!(body["checks"]["payment_api"]["status"], "RED");

    harness.stop().await;
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() {
    let harness = WebHarness::start(demo_actions()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/metrics", harness.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/plain; version=0.0.4"
    );

    let body = response.text().await.unwrap();
    assert!(body.contains("# TYPE jobs_processed_total counter"));
    assert!(body.contains("# TYPE jobs_errors_total counter"));
    assert!(body.contains("# TYPE active_jobs gauge"));
    assert!(body.contains("health_status 2"));

    harness.stop().await;
}

#[tokio::test]
async fn test_dev_job_happy_path() {
    let harness = WebHarness::start(demo_actions()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/dev/job", harness.base_url))
        .json(&json!({"action": "greet", "name": "Alice"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "Completed");
    assert_eq!(body["results"]["message"], "Hello, Alice!");
    assert!(body["job_id"].is_string());
    assert!(body["runtime_ms"].is_number());
    assert!(body["error"].is_null());

    harness.stop().await;
}

#[tokio::test]
async fn test_dev_job_failure_returns_422_with_structured_error() {
    let harness = WebHarness::start(demo_actions()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/dev/job", harness.base_url))
        .json(&json!({"action": "greet"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "Failed");
    assert_eq!(body["error"]["error_code"], "VALIDATION_ERROR");

    harness.stop().await;
}

#[tokio::test]
async fn test_dev_job_unknown_action() {
    let harness = WebHarness::start(demo_actions()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/dev/job", harness.base_url))
        .json(&json!({"action": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["error_code"], "UNKNOWN_ACTION");

    harness.stop().await;
}
