//! Policy descriptors.
//!
//! A descriptor is plain configuration: whether a policy kind is enabled and its
//! numeric thresholds. Descriptors come from two places, the global defaults in
//! [`ResiliencyConfig`] and optional per-request-type [`PolicyOverrides`]. The runtime
//! resolves the effective descriptor (override first, then default) and builds the
//! stateful instance from it.
//!
//! Parameter defaults:
//!
//! | Policy          | Defaults                                  |
//! |-----------------|-------------------------------------------|
//! | rate limit      | 100 executions per 1000 ms, burst 1       |
//! | bulkhead        | 100 parallel, 20 queued                   |
//! | circuit breaker | 3 qualifying failures, 30 000 ms break    |
//! | timeout         | 180 000 ms                                |
//! | retry           | 3 retries, 200 ms base delay              |
//!
//! Every descriptor is disabled by default; enabling is an explicit decision.

use crate::config::ConfigError;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The policy kinds a descriptor can configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Token-bucket rate limit
    RateLimit,
    /// Concurrency gate with bounded queue
    Bulkhead,
    /// Consecutive-failure breaker
    CircuitBreaker,
    /// Wall-clock budget
    Timeout,
    /// Retry with jittered backoff
    Retry,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::RateLimit => "rate_limit",
            Self::Bulkhead => "bulkhead",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Timeout => "timeout",
            Self::Retry => "retry",
        };
        f.write_str(label)
    }
}

fn positive(kind: PolicyKind, field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{kind}.{field} must be >= 1"
        )));
    }
    Ok(())
}

/// Token-bucket rate limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Whether the layer is active
    pub enabled: bool,
    /// Executions allowed per period
    pub executions: u32,
    /// Period length in milliseconds
    pub per_ms: u64,
    /// Maximum tokens that may accumulate
    pub burst: u32,
}

impl RateLimitPolicy {
    /// Period as a `Duration`.
    #[must_use]
    pub const fn per(&self) -> Duration {
        Duration::from_millis(self.per_ms)
    }

    /// Validate thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any threshold is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive(PolicyKind::RateLimit, "executions", u64::from(self.executions))?;
        positive(PolicyKind::RateLimit, "per_ms", self.per_ms)?;
        positive(PolicyKind::RateLimit, "burst", u64::from(self.burst))
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            executions: 100,
            per_ms: 1000,
            burst: 1,
        }
    }
}

/// Concurrency gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadPolicy {
    /// Whether the layer is active
    pub enabled: bool,
    /// Concurrent executions allowed
    pub max_parallelization: usize,
    /// Callers allowed to wait for a slot
    pub max_queuing_actions: usize,
}

impl BulkheadPolicy {
    /// Validate thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the parallelization is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive(
            PolicyKind::Bulkhead,
            "max_parallelization",
            self.max_parallelization as u64,
        )
    }
}

impl Default for BulkheadPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_parallelization: 100,
            max_queuing_actions: 20,
        }
    }
}

/// Consecutive-failure circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerPolicy {
    /// Whether the layer is active
    pub enabled: bool,
    /// Consecutive qualifying failures before opening
    pub exceptions_allowed: u32,
    /// How long the breaker stays open, in milliseconds
    pub duration_of_break_ms: u64,
    /// Kinds counted as failures in addition to the default qualifying set
    pub also_count: Vec<ErrorKind>,
}

impl CircuitBreakerPolicy {
    /// Break duration as a `Duration`.
    #[must_use]
    pub const fn duration_of_break(&self) -> Duration {
        Duration::from_millis(self.duration_of_break_ms)
    }

    /// Whether a failure of `kind` counts toward opening this breaker.
    #[must_use]
    pub fn counts(&self, kind: ErrorKind) -> bool {
        kind.is_breaker_qualifying() || self.also_count.contains(&kind)
    }

    /// Validate thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any threshold is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive(
            PolicyKind::CircuitBreaker,
            "exceptions_allowed",
            u64::from(self.exceptions_allowed),
        )?;
        positive(
            PolicyKind::CircuitBreaker,
            "duration_of_break_ms",
            self.duration_of_break_ms,
        )
    }
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            exceptions_allowed: 3,
            duration_of_break_ms: 30_000,
            also_count: Vec::new(),
        }
    }
}

/// Wall-clock budget for the inner chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Whether the layer is active
    pub enabled: bool,
    /// Budget in milliseconds
    pub duration_ms: u64,
}

impl TimeoutPolicy {
    /// Budget as a `Duration`.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Validate the budget.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the budget is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive(PolicyKind::Timeout, "duration_ms", self.duration_ms)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_ms: 180_000,
        }
    }
}

/// Retry with exponential, jittered backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Whether the layer is active
    pub enabled: bool,
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Base delay in milliseconds
    pub sleep_duration_ms: u64,
    /// Cap for a single delay in milliseconds
    pub max_delay_ms: u64,
    /// Kinds never retried in addition to the fixed non-retryable set
    pub never_retry: Vec<ErrorKind>,
}

impl RetryPolicy {
    /// Base delay as a `Duration`.
    #[must_use]
    pub const fn sleep_duration(&self) -> Duration {
        Duration::from_millis(self.sleep_duration_ms)
    }

    /// Delay cap as a `Duration`.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Whether a failure of `kind` is attempted again.
    #[must_use]
    pub fn retries(&self, kind: ErrorKind) -> bool {
        kind.is_retryable() && !self.never_retry.contains(&kind)
    }

    /// Validate thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any threshold is zero or the cap
    /// is below the base delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive(PolicyKind::Retry, "retry_count", u64::from(self.retry_count))?;
        positive(PolicyKind::Retry, "sleep_duration_ms", self.sleep_duration_ms)?;
        if self.max_delay_ms < self.sleep_duration_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must be >= retry.sleep_duration_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_count: 3,
            sleep_duration_ms: 200,
            max_delay_ms: 30_000,
            never_retry: Vec::new(),
        }
    }
}

/// Global defaults for every policy kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResiliencyConfig {
    /// Rate limit default
    pub rate_limit: RateLimitPolicy,
    /// Bulkhead default
    pub bulkhead: BulkheadPolicy,
    /// Circuit breaker default
    pub circuit_breaker: CircuitBreakerPolicy,
    /// Timeout default
    pub timeout: TimeoutPolicy,
    /// Retry default
    pub retry: RetryPolicy,
}

impl ResiliencyConfig {
    /// Validate every enabled descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.enabled {
            self.rate_limit.validate()?;
        }
        if self.bulkhead.enabled {
            self.bulkhead.validate()?;
        }
        if self.circuit_breaker.enabled {
            self.circuit_breaker.validate()?;
        }
        if self.timeout.enabled {
            self.timeout.validate()?;
        }
        if self.retry.enabled {
            self.retry.validate()?;
        }
        Ok(())
    }
}

/// Per-request-type overrides; `None` falls back to the global default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    /// Rate limit override
    pub rate_limit: Option<RateLimitPolicy>,
    /// Bulkhead override
    pub bulkhead: Option<BulkheadPolicy>,
    /// Circuit breaker override
    pub circuit_breaker: Option<CircuitBreakerPolicy>,
    /// Timeout override
    pub timeout: Option<TimeoutPolicy>,
    /// Retry override
    pub retry: Option<RetryPolicy>,
}

impl PolicyOverrides {
    /// Override the rate limit.
    #[must_use]
    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = Some(policy);
        self
    }

    /// Override the bulkhead.
    #[must_use]
    pub fn bulkhead(mut self, policy: BulkheadPolicy) -> Self {
        self.bulkhead = Some(policy);
        self
    }

    /// Override the circuit breaker.
    #[must_use]
    pub fn circuit_breaker(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = Some(policy);
        self
    }

    /// Override the timeout.
    #[must_use]
    pub fn timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Validate every enabled override.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(p) = self.rate_limit.as_ref().filter(|p| p.enabled) {
            p.validate()?;
        }
        if let Some(p) = self.bulkhead.as_ref().filter(|p| p.enabled) {
            p.validate()?;
        }
        if let Some(p) = self.circuit_breaker.as_ref().filter(|p| p.enabled) {
            p.validate()?;
        }
        if let Some(p) = self.timeout.as_ref().filter(|p| p.enabled) {
            p.validate()?;
        }
        if let Some(p) = self.retry.as_ref().filter(|p| p.enabled) {
            p.validate()?;
        }
        Ok(())
    }
}
