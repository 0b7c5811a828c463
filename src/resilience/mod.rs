//! Resilience primitives for outbound calls: circuit breaking and
//! token-bucket rate limiting.

mod circuit_breaker;
mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::RateLimiter;
