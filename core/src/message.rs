//! Relay messages.
//!
//! Two shapes move through the relay:
//!
//! - [`OutboundMessage`]: an event this service emits, persisted when the primary
//!   stream could not take it (or as an audit row when audit mode is on).
//! - [`InboundMessage`]: an event received from the stream or popped from a fallback
//!   tier, tracked through [`ProcessStatus`].
//!
//! ```text
//! Initial ──enqueued──▶ Incoming ──picked up──▶ Process ──ok──────────▶ Succeed
//!                                                  │
//!                                                  ├──non-transient──▶ Failed
//!                                                  └──transient──────▶ Process (next drain)
//! ```

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an inbound message.
///
/// Numeric codes are persisted and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Recorded through a failure path, not yet eligible for draining
    Initial,
    /// Persisted and waiting for the DB drain
    Incoming,
    /// Picked up; also the resting state after a transient rejection
    Process,
    /// Processed successfully
    Succeed,
    /// Processing failed terminally
    Failed,
    /// Reserved code, never produced
    Succeed1,
    /// Reserved code, never produced
    Failed1,
}

impl ProcessStatus {
    /// Database representation.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::Initial => 0,
            Self::Incoming => 1,
            Self::Process => 2,
            Self::Succeed => 3,
            Self::Failed => 4,
            Self::Succeed1 => 5,
            Self::Failed1 => 6,
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Initial),
            1 => Some(Self::Incoming),
            2 => Some(Self::Process),
            3 => Some(Self::Succeed),
            4 => Some(Self::Failed),
            5 => Some(Self::Succeed1),
            6 => Some(Self::Failed1),
            _ => None,
        }
    }

    /// Statuses the DB drain picks up.
    pub const PENDING: [Self; 2] = [Self::Incoming, Self::Process];

    /// Whether processing has reached an end state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeed | Self::Failed | Self::Succeed1 | Self::Failed1
        )
    }

    /// Status after a processing attempt that ended with `error`.
    ///
    /// Transient rejections (rate limit, bulkhead, open breaker) keep the message in
    /// `Process` so the next drain cycle re-selects it.
    #[must_use]
    pub fn after_attempt(error: Option<&PipelineError>) -> Self {
        match error {
            None => Self::Succeed,
            Some(err) if is_drain_retryable(err) => Self::Process,
            Some(_) => Self::Failed,
        }
    }
}

/// Whether a processing failure leaves the message eligible for the next drain.
#[must_use]
pub fn is_drain_retryable(err: &PipelineError) -> bool {
    matches!(
        err,
        PipelineError::RateLimited { .. }
            | PipelineError::BulkheadRejected { .. }
            | PipelineError::CircuitOpen { .. }
    )
}

/// An outbound event persisted by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Row identifier
    pub id: Uuid,
    /// Physical topic name
    pub topic: String,
    /// Payload as sent to the stream
    pub message: String,
    /// When the row was written
    pub stored_date: DateTime<Utc>,
    /// Whether the primary stream accepted the message
    pub is_sent: bool,
    /// Reserved for consumer acknowledgements
    pub acknowledged: bool,
}

impl OutboundMessage {
    /// Create a row for `topic`.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        message: impl Into<String>,
        stored_date: DateTime<Utc>,
        is_sent: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            message: message.into(),
            stored_date,
            is_sent,
            acknowledged: false,
        }
    }
}

/// Error details recorded on an inbound row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    /// `"{utc timestamp} | {message}"`
    pub error: Option<String>,
    /// Message of the first underlying cause
    pub inner_message: Option<String>,
    /// Diagnostic rendering with the cause chain
    pub stack_trace: Option<String>,
}

impl FailureDetails {
    /// Capture the details of `err` observed at `at`.
    #[must_use]
    pub fn capture(err: &PipelineError, at: DateTime<Utc>) -> Self {
        Self {
            error: Some(format!("{} | {err}", at.format("%Y-%m-%d %H:%M:%S"))),
            inner_message: err.inner_message(),
            stack_trace: Some(err.diagnostic()),
        }
    }
}

/// An inbound event tracked by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Row identifier
    pub id: Uuid,
    /// Physical topic name
    pub topic: String,
    /// Raw payload
    pub message: String,
    /// Failure details, if any
    pub error: Option<String>,
    /// When the message was received
    pub time_in: DateTime<Utc>,
    /// Stream offset (0 when it came from the durable queue)
    pub offset: i64,
    /// Stream partition (0 when it came from the durable queue)
    pub partition: i32,
    /// Lifecycle status
    pub status: ProcessStatus,
    /// Message of the underlying cause
    pub inner_message: Option<String>,
    /// Diagnostic rendering of the failure
    pub stack_trace: Option<String>,
    /// When processing started
    pub time_process: Option<DateTime<Utc>>,
    /// When processing reached an end state; `None` while in `Process`
    pub time_finish: Option<DateTime<Utc>>,
}

impl InboundMessage {
    /// A freshly received message.
    ///
    /// Status is `Incoming`, or `Initial` when `failure` carries an error.
    #[must_use]
    pub fn received(
        topic: impl Into<String>,
        message: impl Into<String>,
        partition: i32,
        offset: i64,
        time_in: DateTime<Utc>,
        failure: FailureDetails,
    ) -> Self {
        let status = if failure.error.is_some() {
            ProcessStatus::Initial
        } else {
            ProcessStatus::Incoming
        };
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            message: message.into(),
            error: failure.error,
            time_in,
            offset,
            partition,
            status,
            inner_message: failure.inner_message,
            stack_trace: failure.stack_trace,
            time_process: None,
            time_finish: None,
        }
    }

    /// Apply the outcome of a processing attempt finished at `at`.
    pub fn finish_attempt(&mut self, error: Option<&PipelineError>, at: DateTime<Utc>) {
        self.status = ProcessStatus::after_attempt(error);
        if let Some(err) = error {
            let details = FailureDetails::capture(err, at);
            self.error = details.error;
            self.inner_message = details.inner_message;
            self.stack_trace = details.stack_trace;
        }
        self.time_finish = if self.status == ProcessStatus::Process {
            None
        } else {
            Some(at)
        };
    }
}

/// Entry on the outbound durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// Physical topic name
    pub name: String,
    /// Payload
    pub value: String,
}

/// A record delivered by the primary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Topic the record was read from
    pub topic: String,
    /// Partition id
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl StreamRecord {
    /// Payload as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_status_codes_are_stable() {
        for code in 0..=6 {
            let status = ProcessStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(ProcessStatus::from_code(7), None);
        assert_eq!(ProcessStatus::Process.code(), 2);
    }

    #[test]
    fn test_transient_rejection_stays_in_process() {
        let open = PipelineError::CircuitOpen {
            request: "HandleOrderCommand".to_string(),
        };
        let mut message =
            InboundMessage::received("orders", "{}", 0, 0, at(), FailureDetails::default());
        message.status = ProcessStatus::Process;

        message.finish_attempt(Some(&open), at());

        assert_eq!(message.status, ProcessStatus::Process);
        assert!(message.time_finish.is_none());
        assert!(message.error.as_deref().unwrap().starts_with("2025-01-01 00:00:00 | "));
    }

    #[test]
    fn test_timeout_is_terminal_for_drain() {
        let timed_out = PipelineError::TimedOut {
            request: "HandleOrderCommand".to_string(),
            budget: std::time::Duration::from_secs(1),
        };
        assert_eq!(
            ProcessStatus::after_attempt(Some(&timed_out)),
            ProcessStatus::Failed
        );
        assert_eq!(ProcessStatus::after_attempt(None), ProcessStatus::Succeed);
    }

    #[test]
    fn test_received_with_error_starts_initial() {
        let err = PipelineError::unhandled("queue down");
        let failure = FailureDetails::capture(&err, at());
        let message = InboundMessage::received("orders", "{}", 3, 42, at(), failure);

        assert_eq!(message.status, ProcessStatus::Initial);
        assert_eq!(message.partition, 3);
        assert_eq!(message.offset, 42);
    }

    #[test]
    fn test_queued_message_wire_format() {
        let queued = QueuedMessage {
            name: "orders".to_string(),
            value: "payload".to_string(),
        };
        let json = serde_json::to_string(&queued).unwrap();
        assert_eq!(json, r#"{"name":"orders","value":"payload"}"#);
    }
}
