//! Error taxonomy for requests flowing through the pipeline.
//!
//! Every failure a request can produce is a [`PipelineError`]. Layers never match on
//! concrete error types; they ask the error for its [`ErrorKind`] and consult the
//! predicates on the kind:
//!
//! | Kind               | Retried | Breaker counts | Logged by guard |
//! |--------------------|---------|----------------|-----------------|
//! | `Validation`       | no      | no             | silent          |
//! | `NotFound`         | no      | no             | silent          |
//! | `BadRequest`       | no      | no             | silent          |
//! | `Cancelled`        | no      | no             | warn            |
//! | `RateLimited`      | yes     | no             | warn            |
//! | `BulkheadRejected` | yes     | no             | warn            |
//! | `TimedOut`         | yes     | no             | warn            |
//! | `CircuitOpen`      | yes     | no             | warn            |
//! | `Configuration`    | yes     | yes            | error           |
//! | `Unhandled`        | yes     | yes            | error           |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Closed classification of every [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// One or more validators rejected the request
    Validation,
    /// The addressed resource does not exist
    NotFound,
    /// The request is malformed beyond field validation
    BadRequest,
    /// The caller cancelled the request
    Cancelled,
    /// The per-type rate limiter had no token available
    RateLimited,
    /// Both the execution slots and the wait queue of the bulkhead were full
    BulkheadRejected,
    /// The inner chain exceeded its wall-clock budget
    TimedOut,
    /// The circuit breaker for the request type is open
    CircuitOpen,
    /// Wiring problem (missing handler, badly named request type)
    Configuration,
    /// Anything else
    Unhandled,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Validation,
        Self::NotFound,
        Self::BadRequest,
        Self::Cancelled,
        Self::RateLimited,
        Self::BulkheadRejected,
        Self::TimedOut,
        Self::CircuitOpen,
        Self::Configuration,
        Self::Unhandled,
    ];

    /// Terminal outcomes the caller can correct or expected by design.
    ///
    /// These are never retried, never counted by the circuit breaker and never
    /// escalated to error-level logging.
    #[must_use]
    pub const fn is_expected(self) -> bool {
        matches!(
            self,
            Self::Validation | Self::NotFound | Self::BadRequest | Self::Cancelled
        )
    }

    /// Rejections produced by the resiliency layers themselves.
    #[must_use]
    pub const fn is_transient_rejection(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::BulkheadRejected | Self::TimedOut | Self::CircuitOpen
        )
    }

    /// Whether the retry layer may attempt the call again.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !self.is_expected()
    }

    /// Whether the circuit breaker counts this kind as a failure by default.
    #[must_use]
    pub const fn is_breaker_qualifying(self) -> bool {
        !self.is_expected() && !self.is_transient_rejection()
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::Cancelled => "cancelled",
            Self::RateLimited => "rate_limited",
            Self::BulkheadRejected => "bulkhead_rejected",
            Self::TimedOut => "timed_out",
            Self::CircuitOpen => "circuit_open",
            Self::Configuration => "configuration",
            Self::Unhandled => "unhandled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level validation failures, keyed by field name.
///
/// Messages for a field are kept distinct and in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            errors: BTreeMap::new(),
        }
    }

    /// Record a message against a field, ignoring duplicates.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        let message = message.into();
        let messages = self.errors.entry(field.into()).or_default();
        if !messages.contains(&message) {
            messages.push(message);
        }
    }

    /// Whether no failure was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of fields with at least one failure.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Messages recorded for `field`.
    #[must_use]
    pub fn messages(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    /// Borrow the underlying field map.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.errors {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl<F, M> FromIterator<(F, M)> for ValidationErrors
where
    F: Into<String>,
    M: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (F, M)>>(iter: I) -> Self {
        let mut errors = Self::new();
        for (field, message) in iter {
            errors.add(field, message);
        }
        errors
    }
}

/// Errors surfaced by the request pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// One or more validators rejected the request
    #[error("One or more validation failures have occurred: {0}")]
    Validation(ValidationErrors),

    /// The addressed resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request is malformed
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The caller cancelled the request
    #[error("Request '{request}' was cancelled")]
    Cancelled {
        /// Request type name
        request: String,
    },

    /// Rate limit exhausted for the request type
    #[error("Rate limit exceeded for '{request}', retry after {retry_after:?}")]
    RateLimited {
        /// Request type name
        request: String,
        /// Time until the next token is available
        retry_after: Duration,
    },

    /// Bulkhead slots and queue are both full
    #[error("Bulkhead rejected '{request}'")]
    BulkheadRejected {
        /// Request type name
        request: String,
    },

    /// The inner chain exceeded its budget and was cancelled
    #[error("Request '{request}' timed out after {budget:?}")]
    TimedOut {
        /// Request type name
        request: String,
        /// Configured budget
        budget: Duration,
    },

    /// The circuit breaker is open
    #[error("Circuit breaker is open for '{request}'")]
    CircuitOpen {
        /// Request type name
        request: String,
    },

    /// Wiring problem detected at call time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Any other failure
    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl PipelineError {
    /// Classification used by every layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::BulkheadRejected { .. } => ErrorKind::BulkheadRejected,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Unhandled(_) => ErrorKind::Unhandled,
        }
    }

    /// Shorthand for [`PipelineError::Unhandled`] from a plain message.
    #[must_use]
    pub fn unhandled(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Unhandled(anyhow::Error::msg(message))
    }

    /// HTTP-equivalent status code for the outer surface.
    ///
    /// Terminal caller errors map to 4xx, resiliency rejections to 503/504/429, and
    /// everything else to 500.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Cancelled => 499,
            ErrorKind::RateLimited => 429,
            ErrorKind::BulkheadRejected | ErrorKind::CircuitOpen => 503,
            ErrorKind::TimedOut => 504,
            ErrorKind::Configuration | ErrorKind::Unhandled => 500,
        }
    }

    /// Message of the first underlying cause, if the error wraps one.
    #[must_use]
    pub fn inner_message(&self) -> Option<String> {
        match self {
            Self::Unhandled(err) => err.chain().nth(1).map(ToString::to_string),
            _ => None,
        }
    }

    /// Diagnostic rendering of the error including its cause chain.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Unhandled(err) => format!("{err:?}"),
            other => format!("{other:?}"),
        }
    }
}
