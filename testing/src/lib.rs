//! # Relaykit Testing
//!
//! Testing utilities for the relaykit pipeline and message relay.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - In-memory collaborators with failure switches and inspection helpers:
//!   [`InMemoryEventStream`], [`InMemoryQueue`], [`InMemoryOutbox`],
//!   [`InMemoryInbox`] and [`InMemoryCache`]
//! - Property-based testing strategies for relay types
//!
//! ## Example
//!
//! ```ignore
//! use relaykit_testing::{InMemoryEventStream, InMemoryQueue, InMemoryOutbox, test_clock};
//!
//! #[tokio::test]
//! async fn test_queue_catches_stream_outage() {
//!     let stream = InMemoryEventStream::new();
//!     stream.set_fail_publish(true);
//!     let queue = InMemoryQueue::new();
//!     let outbox = InMemoryOutbox::new();
//!
//!     let producer = Producer::new(/* ... */);
//!     assert!(!producer.send("orders", "{}").await);
//!     assert_eq!(queue.len("orders-api:ProduceMessage"), 1);
//!     assert!(outbox.rows().is_empty());
//! }
//! ```

mod cache_mocks;
mod relay_mocks;
mod stream_mocks;

pub use cache_mocks::InMemoryCache;
pub use relay_mocks::{InMemoryInbox, InMemoryOutbox, InMemoryQueue};
pub use stream_mocks::{InMemoryCheckpoint, InMemoryEventStream};

use chrono::{DateTime, Utc};
use relaykit_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use relaykit_testing::mocks::FixedClock;
    /// use relaykit_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give another to
    /// the code under test.
    ///
    /// ```
    /// use relaykit_testing::{ManualClock, test_clock};
    /// use relaykit_core::environment::Clock;
    ///
    /// let clock = ManualClock::new(test_clock().now());
    /// let start = clock.now();
    /// clock.advance(chrono::Duration::days(15));
    /// assert_eq!(clock.now() - start, chrono::Duration::days(15));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly `tracing` subscriber once per process.
    ///
    /// Output goes through the test harness capture, filtered by `RUST_LOG` (default
    /// `debug`). Calling it again is a no-op.
    pub fn init_test_tracing() {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }

    /// Drive a future to completion on a fresh single-threaded runtime.
    ///
    /// Handy inside proptest bodies, which are synchronous.
    pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio_test::block_on(future)
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::collection::{btree_map, vec};
    use proptest::prelude::*;
    use relaykit_core::message::ProcessStatus;
    use std::collections::BTreeMap;

    /// Any inbound status, reserved codes included.
    pub fn process_status() -> impl Strategy<Value = ProcessStatus> {
        (0i16..=6).prop_filter_map("known status code", ProcessStatus::from_code)
    }

    /// Physical topic names as brokers accept them.
    pub fn topic_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_.-]{0,23}"
    }

    /// Caller attribute sets, as carried on a request context.
    pub fn caller_attributes() -> impl Strategy<Value = BTreeMap<String, Vec<String>>> {
        btree_map("[a-z]{1,8}", vec("[A-Za-z0-9]{1,6}", 1..4), 0..4)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use relaykit_core::message::ProcessStatus;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let handle = clock.clone();

        handle.advance(chrono::Duration::hours(2));

        assert_eq!(clock.now(), test_clock().now() + chrono::Duration::hours(2));
    }

    proptest! {
        #[test]
        fn status_strategy_round_trips(status in properties::process_status()) {
            prop_assert_eq!(ProcessStatus::from_code(status.code()), Some(status));
        }
    }
}
