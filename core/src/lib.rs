//! # Relaykit Core
//!
//! Core traits and types shared by the request pipeline and the message relay.
//!
//! ## Core Concepts
//!
//! - **Request**: a typed command or query with exactly one handler
//! - **Policy descriptor**: configuration for one resiliency policy kind
//! - **Pipeline error**: a closed taxonomy every layer classifies failures with
//! - **Relay message**: outbound and inbound rows moved between delivery tiers
//! - **Collaborators**: event stream, durable queue, relational store, cache, clock
//!
//! ## Delivery tiers
//!
//! ```text
//!  ┌──────────────┐   fail   ┌───────────────┐   fail   ┌──────────────────┐
//!  │ event stream │ ───────▶ │ durable queue │ ───────▶ │ relational table │
//!  └──────────────┘          └───────────────┘          └──────────────────┘
//!         ▲                          │                           │
//!         └──────── reconciliation jobs drain back ──────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod message;
pub mod policy;
pub mod queue;
pub mod request;
pub mod store;
pub mod stream;

pub use error::{ErrorKind, PipelineError, ValidationErrors};
pub use request::{Request, RequestContext, RequestHandler, RequestKind};

/// Environment traits for dependency injection
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    /// let now = clock.now();
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = FixedClock::new(time);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
