//! # Relaykit Runtime
//!
//! The policy pipeline: every request passes through a fixed chain of resiliency
//! layers before reaching its single handler.
//!
//! ## Core Components
//!
//! - **Pipeline**: the executor composing every layer around a handler
//! - **Policy registry**: resolves the effective descriptor per request type
//! - **Policy instances**: per-type rate limiters, bulkheads and circuit breakers
//! - **Registrations**: per-type handler, validators, fallback and cache policy
//!
//! ## Example
//!
//! ```ignore
//! use relaykit_runtime::Pipeline;
//!
//! let pipeline = Pipeline::builder()
//!     .configure(&config)
//!     .handler::<GetOrderQuery>(Arc::new(GetOrderHandler::new(pool)))
//!     .validator::<GetOrderQuery>(Arc::new(GetOrderValidator))
//!     .build()?;
//!
//! let order = pipeline.send(&GetOrderQuery { id: 7 }, &ctx).await?;
//! ```

/// Token-bucket rate limiter
pub mod rate_limiter;

/// Concurrency gate with a bounded queue
pub mod bulkhead;

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub mod handlers;
pub mod layers;
pub mod pipeline;
pub mod registry;

pub use layers::cache::{CachePolicy, ExpirationPolicy};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use registry::{PolicyInstances, PolicyRegistry};
