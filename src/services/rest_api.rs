//! Resilient REST API client template.
//!
//! Composes a token-bucket rate limiter, a per-target circuit breaker, and
//! a retry loop with exponential backoff and full jitter around a pooled
//! HTTP client. Implements [`Service`] so instances live in the container
//! and report their own health check: GREEN on success, YELLOW while
//! retrying, RED on circuit-open or exhausted retries.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ApiClientError, Result, UsvcError};
use crate::health::{HealthRegistry, HealthStatus};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};
use crate::services::Service;

/// Tuning for one outbound API target.
#[derive(Debug, Clone)]
pub struct RestApiConfig {
    pub base_url: String,

    /// Requests admitted per window (token bucket burst size).
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Open-state wait before a recovery probe.
    pub recovery_timeout: Duration,
    /// Half-open successes required to close.
    pub success_threshold: u32,

    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_base: Duration,
    pub pool_size: usize,
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff_base: Duration::from_secs(1),
            pool_size: 10,
        }
    }
}

impl RestApiConfig {
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(UsvcError::Configuration(
                "REST API client requires a base_url".to_string(),
            ));
        }
        if self.rate_limit_requests == 0 {
            return Err(UsvcError::Configuration(
                "rate_limit_requests must be greater than 0".to_string(),
            ));
        }
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            success_threshold: self.success_threshold,
        }
        .validate()
        .map_err(UsvcError::Configuration)
    }
}

/// What a single attempt did, for retry classification.
enum Attempt {
    Done(reqwest::Response),
    Retry(ApiClientError),
}

/// Resilient HTTP client for one upstream API.
pub struct RestApiClient {
    name: String,
    config: RestApiConfig,
    client: reqwest::Client,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    health: OnceLock<HealthRegistry>,
}

impl RestApiClient {
    /// Build a client named `name` (also its health check name). The
    /// circuit breaker is keyed by the configured base URL.
    pub fn new(name: impl Into<String>, config: RestApiConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_size)
            .build()
            .map_err(|e| UsvcError::Configuration(format!("HTTP client build failed: {e}")))?;

        let breaker = CircuitBreaker::new(
            config.base_url.clone(),
            CircuitBreakerConfig {
                failure_threshold: config.failure_threshold,
                recovery_timeout: config.recovery_timeout,
                success_threshold: config.success_threshold,
            },
        );
        let limiter = RateLimiter::new(config.rate_limit_requests, config.rate_limit_window);

        Ok(Arc::new(Self {
            name: name.into(),
            client,
            limiter,
            breaker,
            health: OnceLock::new(),
            config,
        }))
    }

    pub fn config(&self) -> &RestApiConfig {
        &self.config
    }

    /// Current breaker state, mainly for observability.
    pub fn circuit_state(&self) -> crate::resilience::CircuitState {
        self.breaker.state()
    }

    /// Issue a request with rate limiting, circuit breaking, and retries.
    ///
    /// 5xx, connect errors, and timeouts are retried with exponential
    /// backoff and full jitter; each retry consumes a fresh token. 4xx is
    /// returned to the caller unretried and counts as a breaker success.
    /// When the circuit is open the call fails fast with `CIRCUIT_OPEN`
    /// before any token is consumed.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> std::result::Result<reqwest::Response, ApiClientError> {
        let mut attempt: u32 = 0;
        loop {
            self.check_circuit()?;
            self.limiter.acquire().await;

            match self.attempt(method.clone(), path, body).await {
                Attempt::Done(response) => return Ok(response),
                Attempt::Retry(error) => {
                    if attempt >= self.config.max_retries {
                        self.update_health(
                            HealthStatus::Red,
                            json!({"error": error.to_string(), "attempts": attempt + 1}),
                        );
                        return Err(error);
                    }
                    self.update_health(
                        HealthStatus::Yellow,
                        json!({"retrying": error.error_code(), "attempt": attempt + 1}),
                    );
                    self.backoff(attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Like [`Self::request`] but fails with `RATE_LIMIT_EXCEEDED` instead
    /// of suspending when no token is available. Single attempt, no retry.
    pub async fn try_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> std::result::Result<reqwest::Response, ApiClientError> {
        self.check_circuit()?;
        if !self.limiter.try_acquire().await {
            return Err(ApiClientError::RateLimitExceeded {
                target: self.config.base_url.clone(),
            });
        }
        match self.attempt(method, path, body).await {
            Attempt::Done(response) => Ok(response),
            Attempt::Retry(error) => {
                self.update_health(
                    HealthStatus::Red,
                    json!({"error": error.to_string(), "attempts": 1}),
                );
                Err(error)
            }
        }
    }

    pub async fn get(&self, path: &str) -> std::result::Result<reqwest::Response, ApiClientError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
    ) -> std::result::Result<reqwest::Response, ApiClientError> {
        self.request(Method::POST, path, Some(body)).await
    }

    fn check_circuit(&self) -> std::result::Result<(), ApiClientError> {
        if self.breaker.can_execute() {
            return Ok(());
        }
        self.update_health(HealthStatus::Red, json!({"error": "circuit_open"}));
        Err(ApiClientError::CircuitOpen {
            target: self.config.base_url.clone(),
        })
    }

    async fn attempt(&self, method: Method, path: &str, body: Option<&Value>) -> Attempt {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        match request.send().await {
            Ok(response) if response.status().is_server_error() => {
                self.breaker.record_failure();
                Attempt::Retry(ApiClientError::Upstream5xx {
                    status: response.status().as_u16(),
                })
            }
            Ok(response) => {
                // 2xx-4xx is a live upstream; 4xx is the caller's problem.
                self.breaker.record_success();
                self.update_health(
                    HealthStatus::Green,
                    json!({"last_status": response.status().as_u16()}),
                );
                Attempt::Done(response)
            }
            Err(error) => {
                self.breaker.record_failure();
                let classified = if error.is_timeout() {
                    ApiClientError::UpstreamTimeout(error.to_string())
                } else {
                    ApiClientError::UpstreamConnect(error.to_string())
                };
                Attempt::Retry(classified)
            }
        }
    }

    /// Exponential backoff with full jitter: uniform over
    /// `[0, base * 2^attempt)`.
    async fn backoff(&self, attempt: u32) {
        let ceiling = self.config.retry_backoff_base.as_secs_f64() * 2f64.powi(attempt as i32);
        let delay = Duration::from_secs_f64(ceiling * fastrand::f64());
        debug!(
            target = %self.config.base_url,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        sleep(delay).await;
    }

    fn update_health(&self, status: HealthStatus, details: Value) {
        if let Some(health) = self.health.get() {
            let details = match details {
                Value::Object(map) => Some(map),
                _ => None,
            };
            if let Err(e) = health.update(&self.name, status, details) {
                warn!(service = %self.name, error = %e, "health update failed");
            }
        }
    }
}

#[async_trait]
impl Service for RestApiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, health: &HealthRegistry) -> Result<()> {
        health.register(&self.name);
        let _ = self.health.set(health.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RestApiConfig::for_base_url("https://api.example.com");
        assert_eq!(config.rate_limit_requests, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_requires_base_url() {
        assert!(RestApiConfig::default().validate().is_err());
    }

    #[tokio::test]
    async fn test_connect_errors_open_the_circuit() {
        // Nothing listens on port 1; every attempt is a connect error.
        let client = RestApiClient::new(
            "dead_api",
            RestApiConfig {
                failure_threshold: 2,
                max_retries: 1,
                retry_backoff_base: Duration::from_millis(1),
                recovery_timeout: Duration::from_secs(60),
                ..RestApiConfig::for_base_url("http://127.0.0.1:1")
            },
        )
        .unwrap();

        // Two attempts (initial + one retry) both fail and trip the breaker.
        let err = client.get("/status").await.unwrap_err();
        assert_eq!(err.error_code(), "UPSTREAM_CONNECT");
        assert_eq!(client.circuit_state(), crate::resilience::CircuitState::Open);

        // Now the breaker rejects before touching the network.
        let err = client.get("/status").await.unwrap_err();
        assert_eq!(err.error_code(), "CIRCUIT_OPEN");
    }

    #[tokio::test]
    async fn test_try_request_reports_rate_limit() {
        let client = RestApiClient::new(
            "tight_api",
            RestApiConfig {
                rate_limit_requests: 1,
                rate_limit_window: Duration::from_secs(3600),
                max_retries: 0,
                ..RestApiConfig::for_base_url("http://127.0.0.1:1")
            },
        )
        .unwrap();

        // First call consumes the only token (and fails on connect).
        let err = client.try_request(Method::GET, "/", None).await.unwrap_err();
        assert_eq!(err.error_code(), "UPSTREAM_CONNECT");

        let err = client.try_request(Method::GET, "/", None).await.unwrap_err();
        assert_eq!(err.error_code(), "RATE_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn test_health_check_registered_on_initialize() {
        let client = RestApiClient::new(
            "payments_api",
            RestApiConfig::for_base_url("http://127.0.0.1:1"),
        )
        .unwrap();
        let health = HealthRegistry::new();
        client.initialize(&health).await.unwrap();

        let snapshot = health.snapshot();
        assert!(snapshot.checks.contains_key("payments_api"));
        assert_eq!(snapshot.status, HealthStatus::Green);
    }
}
