//! Per-target circuit breaker.
//!
//! Classic three-state machine: Closed (normal operation), Open (failing
//! fast), HalfOpen (testing recovery). All transitions are atomic and the
//! breaker never blocks the caller; it only answers [`CircuitBreaker::can_execute`],
//! and callers surface a `CIRCUIT_OPEN` failure when the answer is false.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Get current epoch nanos from SystemTime.
#[inline]
fn epoch_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

/// Circuit breaker states representing the current operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, all calls allowed through.
    Closed = 0,
    /// Failure mode, all calls fail fast without executing.
    Open = 1,
    /// Testing recovery, limited probes allowed.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// Configuration for a single circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time to wait in the open state before probing recovery.
    pub recovery_timeout: Duration,

    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        if self.recovery_timeout.is_zero() {
            return Err("recovery_timeout must be greater than 0".to_string());
        }
        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Circuit breaker keyed to one target, with atomic state management.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Target name for logging (base URL for REST clients).
    target: String,

    /// Current circuit state.
    state: AtomicU8,

    config: CircuitBreakerConfig,

    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,

    /// Epoch nanos when the circuit opened (0 = not open). Release/Acquire
    /// ordering paired with state transitions.
    opened_at_epoch_nanos: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let target = target.into();
        debug!(
            target = %target,
            failure_threshold = config.failure_threshold,
            recovery_timeout_secs = config.recovery_timeout.as_secs_f64(),
            success_threshold = config.success_threshold,
            "circuit breaker initialized"
        );
        Self {
            target,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at_epoch_nanos: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether a call should be allowed right now. In the open state, once
    /// `recovery_timeout` has elapsed the breaker eagerly moves to half-open
    /// and answers true for that probe.
    pub fn can_execute(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_nanos = self.opened_at_epoch_nanos.load(Ordering::Acquire);
                if opened_nanos == 0 {
                    warn!(target = %self.target, "circuit open but no timestamp recorded");
                    return true;
                }
                let elapsed = epoch_nanos_now().saturating_sub(opened_nanos);
                if elapsed >= self.config.recovery_timeout.as_nanos() as u64 {
                    self.transition_to_half_open();
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                // Limited probes while recovery is unconfirmed.
                self.half_open_successes.load(Ordering::Relaxed) < self.config.success_threshold
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to_closed();
                }
            }
            CircuitState::Open => {
                warn!(target = %self.target, "success recorded while circuit is open");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => {
                // Any half-open failure reopens immediately.
                self.transition_to_open();
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to_closed(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.half_open_successes.store(0, Ordering::Relaxed);
        self.opened_at_epoch_nanos.store(0, Ordering::Release);
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        info!(target = %self.target, "circuit breaker closed (recovered)");
    }

    fn transition_to_open(&self) {
        self.opened_at_epoch_nanos
            .store(epoch_nanos_now(), Ordering::Release);
        self.half_open_successes.store(0, Ordering::Relaxed);
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        warn!(
            target = %self.target,
            consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed),
            recovery_timeout_secs = self.config.recovery_timeout.as_secs_f64(),
            "circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        self.half_open_successes.store(0, Ordering::Relaxed);
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);
        info!(target = %self.target, "circuit breaker half-open (testing recovery)");
    }
}
