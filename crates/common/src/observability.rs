//! Structured lifecycle events and counters for ceremony sessions.
//!
//! [`LogEvent`]s are serialized to JSON and emitted through `tracing` under
//! the `ceremony_event` message, so log aggregation can filter on
//! `event_type` and `correlation_id` (the session id).
//!
//! ```ignore
//! use common::observability::{CeremonyMetrics, EventType, LogEvent};
//!
//! let metrics = CeremonyMetrics::new();
//! LogEvent::new(EventType::SessionStarted)
//!     .with_correlation_id(handle.session_id.to_string())
//!     .with_round(handle.round)
//!     .emit();
//! metrics.inc_sessions_started();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::RoundKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Session lifecycle
    SessionInitiated,
    SessionStarted,
    SessionCompleted,
    SessionFailed,
    SessionTimeout,

    // Polling
    PollIteration,
    CompletionMatched,
    MalformedEvent,

    // Ledger
    TransactionSubmitted,
    TransactionFailed,
    TransportError,

    // Objects
    ObjectResolved,
    ObjectStateReached,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SessionInitiated => "session_initiated",
            Self::SessionStarted => "session_started",
            Self::SessionCompleted => "session_completed",
            Self::SessionFailed => "session_failed",
            Self::SessionTimeout => "session_timeout",
            Self::PollIteration => "poll_iteration",
            Self::CompletionMatched => "completion_matched",
            Self::MalformedEvent => "malformed_event",
            Self::TransactionSubmitted => "transaction_submitted",
            Self::TransactionFailed => "transaction_failed",
            Self::TransportError => "transport_error",
            Self::ObjectResolved => "object_resolved",
            Self::ObjectStateReached => "object_state_reached",
        };
        write!(f, "{}", s)
    }
}

impl EventType {
    fn is_warning(self) -> bool {
        matches!(
            self,
            Self::SessionFailed
                | Self::SessionTimeout
                | Self::MalformedEvent
                | Self::TransactionFailed
                | Self::TransportError
        )
    }
}

/// A structured log event with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub event_type: EventType,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Session id, when the event belongs to one.
    pub correlation_id: Option<String>,
    pub round: Option<RoundKind>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub context: HashMap<String, String>,
    pub error: Option<String>,
}

impl LogEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp_ms: Utc::now().timestamp_millis().max(0) as u64,
            correlation_id: None,
            round: None,
            duration_ms: None,
            context: HashMap::new(),
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_round(mut self, round: RoundKind) -> Self {
        self.round = Some(round);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Emit this event using tracing.
    pub fn emit(&self) {
        let json = serde_json::to_string(&self).unwrap_or_default();

        if self.event_type.is_warning() {
            tracing::warn!(event = %json, "ceremony_event");
        } else {
            tracing::debug!(event = %json, "ceremony_event");
        }
    }
}

/// Process-wide counters for ceremony activity. Cheap to share behind an
/// `Arc`.
#[derive(Debug, Default)]
pub struct CeremonyMetrics {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_timed_out: AtomicU64,
    sessions_failed: AtomicU64,
    poll_iterations: AtomicU64,
    events_scanned: AtomicU64,
    transport_errors: AtomicU64,
}

impl CeremonyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_sessions_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_timed_out(&self) {
        self.sessions_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one poll iteration that scanned `events` events.
    pub fn record_poll(&self, events: u64) {
        self.poll_iterations.fetch_add(1, Ordering::Relaxed);
        self.events_scanned.fetch_add(events, Ordering::Relaxed);
    }

    pub fn inc_transport_errors(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_timed_out: self.sessions_timed_out.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            poll_iterations: self.poll_iterations.load(Ordering::Relaxed),
            events_scanned: self.events_scanned.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_timed_out: u64,
    pub sessions_failed: u64,
    pub poll_iterations: u64,
    pub events_scanned: u64,
    pub transport_errors: u64,
}
