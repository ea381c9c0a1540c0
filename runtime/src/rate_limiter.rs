//! Token-bucket rate limiter, one instance per request type.
//!
//! ```text
//! Bucket (capacity: burst)
//! ├─ Tokens refill continuously at executions / period
//! ├─ Each request consumes one token
//! └─ If no token is available → request rejected with a retry-after hint
//! ```
//!
//! With the default `100 per 1s, burst 1` the limiter admits one request every
//! 10 ms; a larger burst lets idle capacity accumulate.

use relaykit_core::policy::RateLimitPolicy;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Internal state tracking
#[derive(Debug)]
struct RateLimiterState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    state: RwLock<RateLimiterState>,
}

impl RateLimiter {
    /// Create a limiter for `name` from a descriptor. The bucket starts full.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: &RateLimitPolicy) -> Self {
        let capacity = f64::from(policy.burst.max(1));
        let per = policy.per().as_secs_f64().max(f64::EPSILON);
        Self {
            name: name.into(),
            capacity,
            refill_per_sec: f64::from(policy.executions) / per,
            state: RwLock::new(RateLimiterState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token.
    ///
    /// # Errors
    ///
    /// Returns the time until the next token becomes available when the bucket is
    /// empty.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.write().await;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = elapsed.mul_add(self.refill_per_sec, state.tokens).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            let retry_after = Duration::from_secs_f64(missing / self.refill_per_sec);
            tracing::debug!(
                limiter = %self.name,
                available = state.tokens,
                retry_after_ms = retry_after.as_millis(),
                "Rate limiter bucket empty"
            );
            Err(retry_after)
        }
    }

    /// Get current token count
    pub async fn available_tokens(&self) -> f64 {
        self.state.read().await.tokens
    }

    /// Get rate limiter name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
