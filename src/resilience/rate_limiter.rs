//! Token-bucket rate limiter with continuous refill.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::trace;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket sized to `capacity` requests per `window`. Tokens refill
/// continuously at `capacity / window` per second, so short bursts up to
/// `capacity` are allowed while the long-run rate stays bounded.
///
/// The bucket state lives behind a single async mutex; suspended callers
/// are served in wake-order, which keeps a thundering herd from racing the
/// same refill.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate: capacity / window_secs,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Take one token, suspending until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.refill_rate
            };
            trace!(wait_secs = wait, "rate limiter waiting for refill");
            sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Take one token if immediately available; never suspends.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count after refill. Observability only.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_up_to_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(2, Duration::from_millis(200));
        limiter.acquire().await;
        limiter.acquire().await;

        // Bucket is empty; the next acquire must wait roughly one refill
        // period (100ms per token).
        let started = Instant::now();
        limiter.acquire().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50), "elapsed: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_refill_caps_at_capacity() {
        let limiter = RateLimiter::new(2, Duration::from_millis(20));
        limiter.acquire().await;
        limiter.acquire().await;

        // After well over a full window, the bucket holds capacity tokens,
        // not more.
        sleep(Duration::from_millis(100)).await;
        assert!(limiter.available().await <= 2.0);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_throughput_bound_over_window() {
        // capacity 5 per 100ms; over ~200ms we should never admit more than
        // capacity * (elapsed / window) + capacity = 5 * 2 + 5.
        let limiter = RateLimiter::new(5, Duration::from_millis(100));
        let started = Instant::now();
        let mut admitted = 0u32;
        while started.elapsed() < Duration::from_millis(200) {
            if limiter.try_acquire().await {
                admitted += 1;
            }
            tokio::task::yield_now().await;
        }
        assert!(admitted <= 15, "admitted {admitted} calls");
    }
}
