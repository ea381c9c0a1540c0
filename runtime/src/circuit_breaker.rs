//! Circuit breaker for preventing cascading failures.
//!
//! A circuit breaker monitors calls for one request type and "opens" (stops
//! admitting calls) after a run of consecutive qualifying failures.
//!
//! # States
//!
//! - **Closed**: Normal operation. Calls pass through. Qualifying failures are counted.
//! - **Open**: Too many failures detected. Calls fail immediately for the break duration.
//! - **HalfOpen**: After the break, exactly one trial call is admitted. Success closes
//!   the circuit, a qualifying failure reopens it for another break.
//!
//! Which failures qualify is decided by the caller through a predicate, so the
//! breaker itself never inspects error types.
//!
//! # Example
//!
//! ```rust
//! use relaykit_core::policy::CircuitBreakerPolicy;
//! use relaykit_runtime::circuit_breaker::CircuitBreaker;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new("GetOrderQuery", &CircuitBreakerPolicy::default());
//!
//! let result = breaker
//!     .call(|| async { Ok::<_, String>(42) }, |_err: &String| true)
//!     .await;
//! assert!(result.is_ok());
//! # }
//! ```

use crate::metrics::PipelineMetrics;
use relaykit_core::policy::CircuitBreakerPolicy;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls fail immediately
    Open,
    /// Circuit is half-open, one trial call decides recovery
    HalfOpen,
}

impl State {
    const fn label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, call rejected
    #[error("Circuit breaker is open")]
    Open,
    /// Operation failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

/// Internal state of the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerState {
    state: State,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker for one request type.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    exceptions_allowed: u32,
    duration_of_break: Duration,
    state: Mutex<CircuitBreakerState>,
    // Metrics
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

/// An admitted call. Dropping an unsettled trial frees the half-open slot so a
/// cancelled trial does not wedge the breaker.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Attempt<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(outcome, self.trial);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    QualifyingFailure,
    IgnoredFailure,
}

impl CircuitBreaker {
    /// Create a closed breaker for `name` from a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: &CircuitBreakerPolicy) -> Self {
        Self {
            name: name.into(),
            exceptions_allowed: policy.exceptions_allowed.max(1),
            duration_of_break: policy.duration_of_break(),
            state: Mutex::new(CircuitBreakerState {
                state: State::Closed,
                failure_count: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            total_calls: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the current state of the circuit breaker.
    #[must_use]
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Call an operation through the circuit breaker.
    ///
    /// `counts` decides whether a failure moves the breaker toward opening. A
    /// failure it rejects leaves the consecutive count untouched.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` if the circuit is open or a half-open
    /// trial is already running.
    /// Returns `CircuitBreakerError::Inner` if the operation fails.
    pub async fn call<F, Fut, T, E, C>(
        &self,
        operation: F,
        counts: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let Some(attempt) = self.try_acquire() else {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(request = %self.name, "Circuit breaker is OPEN, rejecting call");
            return Err(CircuitBreakerError::Open);
        };

        match operation().await {
            Ok(result) => {
                attempt.settle(Outcome::Success);
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(err) => {
                let outcome = if counts(&err) {
                    Outcome::QualifyingFailure
                } else {
                    Outcome::IgnoredFailure
                };
                attempt.settle(outcome);
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Admit a call if the current state allows it.
    fn try_acquire(&self) -> Option<Attempt<'_>> {
        let mut state = self.lock();

        let trial = match state.state {
            State::Closed => false,
            State::Open => {
                let expired = state
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.duration_of_break);
                if !expired {
                    return None;
                }
                self.transition(&mut state, State::HalfOpen);
                true
            }
            State::HalfOpen => {
                if state.trial_in_flight {
                    return None;
                }
                true
            }
        };

        if trial {
            state.trial_in_flight = true;
        }
        Some(Attempt {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record(&self, outcome: Outcome, trial: bool) {
        let mut state = self.lock();
        if trial {
            state.trial_in_flight = false;
        }

        match (state.state, outcome) {
            (State::Closed, Outcome::Success) => state.failure_count = 0,
            (State::Closed, Outcome::QualifyingFailure) => {
                state.failure_count += 1;
                if state.failure_count >= self.exceptions_allowed {
                    tracing::warn!(
                        request = %self.name,
                        failures = state.failure_count,
                        break_ms = self.duration_of_break.as_millis(),
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    self.open(&mut state);
                }
            }
            (State::HalfOpen, Outcome::Success) if trial => {
                self.transition(&mut state, State::Closed);
                state.failure_count = 0;
                state.opened_at = None;
            }
            (State::HalfOpen, Outcome::QualifyingFailure) if trial => {
                tracing::warn!(
                    request = %self.name,
                    "Circuit breaker transitioning HALF_OPEN -> OPEN (trial failed)"
                );
                self.open(&mut state);
            }
            // Ignored failures, and late results from calls admitted before the
            // circuit changed state, leave it as it is.
            _ => {}
        }
    }

    fn open(&self, state: &mut CircuitBreakerState) {
        self.transition(state, State::Open);
        state.opened_at = Some(Instant::now());
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: State) {
        if state.state != to {
            tracing::info!(
                request = %self.name,
                from = state.state.label(),
                to = to.label(),
                "Circuit breaker state change"
            );
            PipelineMetrics::record_transition(&self.name, to.label());
            state.state = to;
        }
    }

    /// Get circuit breaker metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Reset the circuit breaker to closed state.
    ///
    /// Useful for testing or manual intervention.
    pub fn reset(&self) {
        let mut state = self.lock();
        tracing::info!(request = %self.name, "Circuit breaker manually reset to CLOSED");
        self.transition(&mut state, State::Closed);
        state.failure_count = 0;
        state.opened_at = None;
        state.trial_in_flight = false;
    }
}

/// Metrics for circuit breaker monitoring.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls attempted
    pub total_calls: u64,
    /// Total number of successful calls
    pub total_successes: u64,
    /// Total number of failed calls
    pub total_failures: u64,
    /// Total number of rejected calls (circuit open)
    pub total_rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Calculate success rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        self.total_successes as f64 / self.total_calls as f64
    }

    /// Calculate rejection rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_rejections as f64 / self.total_calls as f64
    }
}
