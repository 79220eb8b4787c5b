//! Completion-event correlation.
//!
//! The MPC network reports results only through ledger events. The
//! correlator polls the event log for the one event that carries the
//! expected completion type and the session id of a [`SessionHandle`].
//!
//! Two scan strategies are supported:
//!
//! - [`PollStrategy::Cursor`]: page through events of the expected type
//!   strictly after the last event already seen, starting at the handle's
//!   start-session event. Nothing is scanned twice.
//! - [`PollStrategy::Window`]: query every event emitted in the last two
//!   poll intervals, one page per iteration.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use common::{
    CeremonyError, CeremonyMetrics, CompletionEvent, CompletionKind, EventId, EventType,
    LedgerEvent, LogEvent, PollStrategy, Result, SessionHandle, SessionId,
};
use ledger::{EventFilter, EventQuery};

use crate::config::SessionConfig;

pub struct EventCorrelator {
    config: Arc<SessionConfig>,
    metrics: Arc<CeremonyMetrics>,
}

impl EventCorrelator {
    pub fn new(config: Arc<SessionConfig>, metrics: Arc<CeremonyMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Wait for the completion event of `handle`'s session.
    ///
    /// Each iteration sleeps one poll interval and then scans. Transport
    /// failures are logged and the next iteration proceeds; any other error
    /// ends the wait. Returns [`CeremonyError::SessionTimeout`] once the
    /// configured budget is spent.
    pub async fn await_completion(
        &self,
        handle: &SessionHandle,
        kind: CompletionKind,
    ) -> Result<CompletionEvent> {
        let expected_type = self.config.event_type(kind.event_name());
        let start = Instant::now();
        let mut cursor = handle.start_event.clone();
        let mut iteration = 0u64;

        debug!(
            session_id = %handle.session_id,
            event_type = %expected_type,
            strategy = ?self.config.poll_strategy,
            "Awaiting completion event"
        );

        while start.elapsed() < self.config.timeout {
            sleep(self.config.poll_interval).await;
            iteration += 1;
            LogEvent::new(EventType::PollIteration)
                .with_correlation_id(handle.session_id.to_string())
                .with_round(handle.round)
                .with_duration(start.elapsed())
                .with_context("iteration", iteration.to_string())
                .emit();

            let scan = match self.config.poll_strategy {
                PollStrategy::Cursor => {
                    self.scan_after_cursor(&expected_type, &handle.session_id, kind, &mut cursor)
                        .await
                }
                PollStrategy::Window => {
                    self.scan_window(&expected_type, &handle.session_id, kind)
                        .await
                }
            };

            match scan {
                Ok(Some(event)) => {
                    LogEvent::new(EventType::CompletionMatched)
                        .with_correlation_id(handle.session_id.to_string())
                        .with_round(handle.round)
                        .with_duration(start.elapsed())
                        .with_context("iterations", iteration.to_string())
                        .emit();
                    return Ok(event);
                }
                Ok(None) => {
                    trace!(session_id = %handle.session_id, iteration, "No completion yet");
                }
                Err(CeremonyError::Ledger(e)) if e.is_transient() => {
                    warn!(session_id = %handle.session_id, error = %e, "Event query failed, retrying");
                    self.metrics.inc_transport_errors();
                    LogEvent::new(EventType::TransportError)
                        .with_correlation_id(handle.session_id.to_string())
                        .with_error(e.to_string())
                        .emit();
                }
                Err(e) => {
                    if matches!(e, CeremonyError::MalformedCompletionEvent { .. }) {
                        LogEvent::new(EventType::MalformedEvent)
                            .with_correlation_id(handle.session_id.to_string())
                            .with_round(handle.round)
                            .with_error(e.to_string())
                            .emit();
                    }
                    return Err(e);
                }
            }
        }

        Err(CeremonyError::SessionTimeout {
            event_type: expected_type,
            elapsed: start.elapsed(),
        })
    }

    async fn scan_after_cursor(
        &self,
        expected_type: &str,
        session_id: &SessionId,
        kind: CompletionKind,
        cursor: &mut Option<EventId>,
    ) -> Result<Option<CompletionEvent>> {
        let filter = EventFilter::MoveEventType(expected_type.to_string());
        let mut scanned = 0u64;

        loop {
            let query = EventQuery::new(filter.clone(), self.config.page_limit).after(cursor.clone());
            let page = self.config.ledger.query_events(&query).await?;
            scanned += page.data.len() as u64;

            for event in &page.data {
                if let Some(found) = match_event(event, expected_type, session_id, kind) {
                    self.metrics.record_poll(scanned);
                    return found.map(Some);
                }
            }

            if page.next_cursor.is_some() {
                *cursor = page.next_cursor;
            }
            if !page.has_next_page {
                break;
            }
        }

        self.metrics.record_poll(scanned);
        Ok(None)
    }

    async fn scan_window(
        &self,
        expected_type: &str,
        session_id: &SessionId,
        kind: CompletionKind,
    ) -> Result<Option<CompletionEvent>> {
        let end_ms = Utc::now().timestamp_millis().max(0) as u64;
        let span_ms = 2 * self.config.poll_interval.as_millis() as u64;
        let filter = EventFilter::TimeRange {
            start_ms: end_ms.saturating_sub(span_ms),
            end_ms,
        };

        let page = self
            .config
            .ledger
            .query_events(&EventQuery::new(filter, self.config.page_limit))
            .await?;
        self.metrics.record_poll(page.data.len() as u64);

        for event in &page.data {
            if let Some(found) = match_event(event, expected_type, session_id, kind) {
                return found.map(Some);
            }
        }
        Ok(None)
    }
}

/// Check one raw event against the expected completion.
///
/// `None` when the type (generics stripped) or the session id differ.
/// Otherwise the decoded payload, or the decode failure.
pub fn match_event(
    event: &LedgerEvent,
    expected_type: &str,
    session_id: &SessionId,
    kind: CompletionKind,
) -> Option<Result<CompletionEvent>> {
    let base_type = event
        .event_type
        .split('<')
        .next()
        .unwrap_or(&event.event_type);
    if base_type != expected_type {
        return None;
    }
    if event.payload_session_id().as_ref() != Some(session_id) {
        return None;
    }
    Some(CompletionEvent::decode(kind, &event.parsed_json))
}
