//! Error types for the usvc worker system.
//!
//! Every failure that can end up in a job error record or a log line carries
//! a stable string code (see [`QueueError::error_code`],
//! [`ActionError::error_code`], [`ApiClientError::error_code`]). The codes
//! are part of the operational contract: dashboards and downstream consumers
//! key off them.

use thiserror::Error;

/// Top-level error type for the usvc library.
#[derive(Error, Debug)]
pub enum UsvcError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Service container error: {0}")]
    Container(#[from] ContainerError),

    #[error("API client error: {0}")]
    ApiClient(#[from] ApiClientError),

    #[error("Unknown health check: {0}")]
    UnknownHealthCheck(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("HTTP server error: {0}")]
    Http(String),

    #[error("Registry publisher error: {0}")]
    Registry(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, UsvcError>;

/// Failures surfaced by a queue backend.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The backend could not be reached or a statement failed in transit.
    /// Claimed rows stay Assigned; the worker retries the next poll cycle.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// A terminal transition was attempted on a job that does not exist or
    /// is already terminal.
    #[error("queue consistency violation: {0}")]
    Consistency(String),
}

impl QueueError {
    pub fn error_code(&self) -> &'static str {
        match self {
            QueueError::Unavailable(_) => "QUEUE_UNAVAILABLE",
            QueueError::Consistency(_) => "QUEUE_CONSISTENCY",
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

/// Failures raised while routing a job payload to its handler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// Payload is not an object or has no string `action` field.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// No handler registered under the requested name.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Input failed schema validation; the message carries field-level detail.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A declared service dependency is missing from the container.
    #[error("unresolved dependency: {0}")]
    DependencyUnresolved(String),

    /// Two registrations under the same action name.
    #[error("duplicate action: {0}")]
    DuplicateAction(String),

    /// The handler itself failed. `code` defaults to HANDLER_ERROR but
    /// pass-through failures (circuit open, upstream errors) keep their own.
    #[error("{message}")]
    Handler { code: String, message: String },
}

impl ActionError {
    /// Wrap an arbitrary handler failure, preserving its message.
    pub fn handler(message: impl Into<String>) -> Self {
        ActionError::Handler {
            code: "HANDLER_ERROR".to_string(),
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            ActionError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ActionError::UnknownAction(_) => "UNKNOWN_ACTION",
            ActionError::Validation(_) => "VALIDATION_ERROR",
            ActionError::DependencyUnresolved(_) => "DEPENDENCY_UNRESOLVED",
            ActionError::DuplicateAction(_) => "DUPLICATE_ACTION",
            ActionError::Handler { code, .. } => code,
        }
    }
}

impl From<ApiClientError> for ActionError {
    fn from(err: ApiClientError) -> Self {
        ActionError::Handler {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Failures from building or running the service container.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// `depends_on` references form a cycle. Fatal before the worker runs.
    #[error("dependency cycle among services: {0:?}")]
    Cycle(Vec<String>),

    /// A service depends on a name that was never registered.
    #[error("service {service} depends on unregistered service {dependency}")]
    UnknownDependency { service: String, dependency: String },

    /// Two registrations under the same service name.
    #[error("duplicate service: {0}")]
    DuplicateService(String),

    /// A service factory or `initialize` hook failed.
    #[error("service {service} failed to initialize: {message}")]
    Init { service: String, message: String },

    /// Lookup of a service that is not in the container.
    #[error("service not found: {0}")]
    NotFound(String),
}

impl ContainerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ContainerError::Cycle(_) => "DEPENDENCY_CYCLE",
            ContainerError::UnknownDependency { .. } | ContainerError::NotFound(_) => {
                "DEPENDENCY_UNRESOLVED"
            }
            ContainerError::DuplicateService(_) => "DUPLICATE_SERVICE",
            ContainerError::Init { .. } => "SERVICE_INIT_FAILED",
        }
    }
}

/// Failures from the resilient REST API client template.
#[derive(Error, Debug)]
pub enum ApiClientError {
    /// Circuit breaker rejected the call before any token was consumed.
    #[error("circuit breaker is open for {target}")]
    CircuitOpen { target: String },

    /// `try_acquire` found no token available.
    #[error("rate limit exceeded for {target}")]
    RateLimitExceeded { target: String },

    /// The upstream answered 5xx on the final attempt.
    #[error("upstream returned {status}")]
    Upstream5xx { status: u16 },

    /// The request deadline elapsed on the final attempt.
    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    /// Connection-level failure on the final attempt.
    #[error("upstream connection failed: {0}")]
    UpstreamConnect(String),
}

impl ApiClientError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiClientError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            ApiClientError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ApiClientError::Upstream5xx { .. } => "UPSTREAM_5XX",
            ApiClientError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            ApiClientError::UpstreamConnect(_) => "UPSTREAM_CONNECT",
        }
    }
}
