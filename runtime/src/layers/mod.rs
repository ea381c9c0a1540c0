//! Pipeline layers.
//!
//! Each layer is an async function taking the request type name, its own policy
//! (or `None` when disabled) and a `next` closure that runs every layer below it.
//! A disabled layer calls `next` directly and touches no state.
//!
//! ```text
//! pre-log ─▶ rate_limit ─▶ bulkhead ─▶ circuit_breaker ─▶ timeout ─▶ guard
//!        ─▶ request_kind ─▶ validation ─▶ performance ─▶ cache ─▶ fallback
//!        ─▶ retry ─▶ handler
//! ```

pub mod bulkhead;
pub mod cache;
pub mod circuit_breaker;
pub mod fallback;
pub mod guard;
pub mod performance;
pub mod rate_limit;
pub mod request_kind;
pub mod retry;
pub mod timeout;
pub mod validation;

use serde::Serialize;

/// JSON rendering of a payload for logs.
pub(crate) fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}
