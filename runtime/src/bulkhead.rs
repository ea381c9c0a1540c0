//! Bulkhead for isolating one request type's concurrency.
//!
//! ```text
//! caller ──▶ free slot? ──yes──▶ execute
//!               │no
//!               ▼
//!           queue space? ──yes──▶ wait for slot (or caller cancellation)
//!               │no
//!               ▼
//!            rejected
//! ```
//!
//! A bulkhead with `max_queuing_actions = 0` rejects as soon as every slot is busy.

use relaykit_core::policy::BulkheadPolicy;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

/// Errors from bulkhead admission.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadError {
    /// Every execution slot and every queue position is taken
    #[error("Bulkhead is full")]
    Full,
    /// The caller cancelled while waiting for a slot
    #[error("Cancelled while queued in bulkhead")]
    Cancelled,
}

/// Concurrency gate with a bounded wait queue.
#[derive(Debug)]
pub struct Bulkhead {
    name: String,
    semaphore: Semaphore,
    queued: AtomicUsize,
    max_parallelization: usize,
    max_queuing: usize,
}

/// Decrements the queue count when the waiter leaves the queue.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Bulkhead {
    /// Create a bulkhead for `name` from a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: &BulkheadPolicy) -> Self {
        let max_parallelization = policy.max_parallelization.max(1);
        Self {
            name: name.into(),
            semaphore: Semaphore::new(max_parallelization),
            queued: AtomicUsize::new(0),
            max_parallelization,
            max_queuing: policy.max_queuing_actions,
        }
    }

    /// Execute `f` inside the bulkhead.
    ///
    /// The slot is released when `f` completes or is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BulkheadError::Full`] when both slots and queue are exhausted, or
    /// [`BulkheadError::Cancelled`] when `cancellation` fires while queued.
    pub async fn execute<F, T>(&self, cancellation: &CancellationToken, f: F) -> Result<T, BulkheadError>
    where
        F: Future<Output = T>,
    {
        let permit = match self.semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                let _slot = self.reserve_queue_slot()?;
                tracing::debug!(bulkhead = %self.name, "Waiting for bulkhead slot");
                tokio::select! {
                    biased;
                    () = cancellation.cancelled() => return Err(BulkheadError::Cancelled),
                    permit = self.semaphore.acquire() => permit.map_err(|_| BulkheadError::Full)?,
                }
            }
            Err(TryAcquireError::Closed) => return Err(BulkheadError::Full),
        };

        let result = f.await;
        drop(permit);
        Ok(result)
    }

    fn reserve_queue_slot(&self) -> Result<QueueSlot<'_>, BulkheadError> {
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued < self.max_queuing).then_some(queued + 1)
            })
            .map(|_| QueueSlot(&self.queued))
            .map_err(|queued| {
                tracing::warn!(
                    bulkhead = %self.name,
                    queued,
                    max_parallelization = self.max_parallelization,
                    "Bulkhead slots and queue exhausted"
                );
                BulkheadError::Full
            })
    }

    /// Get number of free execution slots
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get number of callers currently waiting
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Get bulkhead name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
