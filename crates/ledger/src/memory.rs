//! In-memory ledger for tests and local runs.
//!
//! Submitted transactions are signature-checked, assigned a digest and a
//! fresh session id, and emit a start-session event. Completion events are
//! scripted per Move function with [`InMemoryLedger::respond_to`] and
//! appear in the event log once their delay has elapsed (measured with
//! `tokio::time`, so paused-clock tests advance them deterministically).
//! Every sender holds one gas coin.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use common::{Address, EventId, LedgerError, LedgerEvent, ObjectId, SessionId};

use crate::client::{
    CreatedObject, DynamicFieldInfo, DynamicFieldName, EventFilter, EventPage, EventQuery,
    ExecutionResult, ExecutionStatus, GasCoin, LedgerClient, ObjectData, ObjectOptions, Owner,
};
use crate::transaction::{ObjectDigest, SignedTransaction, TransactionData, FRAMEWORK_PACKAGE};

/// Name of the event every submitted session transaction emits first.
pub const START_SESSION_EVENT: &str = "DWalletSessionEvent";

pub const REFERENCE_GAS_PRICE: u64 = 1_000;

const DEFAULT_GAS_BALANCE: u64 = 1_000_000_000_000;

/// Builds a completion payload for the session a transaction started.
pub type PayloadFn = Arc<dyn Fn(&SessionId) -> Value + Send + Sync>;

#[derive(Clone)]
struct Responder {
    event_name: String,
    delay: Duration,
    payload: PayloadFn,
}

#[derive(Clone)]
struct StartEvent {
    event_name: String,
    payload: PayloadFn,
}

struct PendingEvent {
    due: Instant,
    event_type: String,
    payload: Value,
}

struct PendingObject {
    due: Instant,
    object: ObjectData,
}

#[derive(Default)]
struct State {
    objects: HashMap<ObjectId, ObjectData>,
    dynamic_fields: HashMap<ObjectId, Vec<(DynamicFieldInfo, ObjectData)>>,
    log: Vec<LedgerEvent>,
    pending_events: Vec<PendingEvent>,
    pending_objects: Vec<PendingObject>,
    responders: HashMap<String, Responder>,
    start_events: HashMap<String, StartEvent>,
    gas_balance: Option<u64>,
    session_ids: VecDeque<SessionId>,
    failed_submissions: VecDeque<String>,
    failed_queries: VecDeque<LedgerError>,
    skip_start_events: usize,
    submitted: Vec<TransactionData>,
    digests: u64,
}

impl State {
    fn next_digest(&mut self, prefix: &str) -> String {
        self.digests += 1;
        format!("{}{:08}", prefix, self.digests)
    }

    fn append(&mut self, digest: &str, seq: u64, event_type: String, payload: Value, ts: u64) {
        self.log.push(LedgerEvent {
            id: EventId::new(digest, seq),
            event_type,
            parsed_json: payload,
            timestamp_ms: Some(ts),
        });
    }

    /// Move everything whose delay has elapsed into the visible state.
    fn promote(&mut self) {
        let now = Instant::now();

        let mut due: Vec<PendingEvent> = Vec::new();
        let mut i = 0;
        while i < self.pending_events.len() {
            if self.pending_events[i].due <= now {
                due.push(self.pending_events.remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|p| p.due);
        for pending in due {
            // Stamp with the due time, not the time it was noticed.
            let late_ms = now.duration_since(pending.due).as_millis() as u64;
            let digest = self.next_digest("mpc");
            let ts = now_ms().saturating_sub(late_ms);
            self.append(&digest, 0, pending.event_type, pending.payload, ts);
        }

        let mut i = 0;
        while i < self.pending_objects.len() {
            if self.pending_objects[i].due <= now {
                let pending = self.pending_objects.remove(i);
                self.objects.insert(pending.object.object_id, pending.object);
            } else {
                i += 1;
            }
        }
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn matches_filter(event: &LedgerEvent, filter: &EventFilter) -> bool {
    match filter {
        EventFilter::MoveEventType(ty) => &event.event_type == ty,
        EventFilter::TimeRange { start_ms, end_ms } => event
            .timestamp_ms
            .map(|ts| ts >= *start_ms && ts <= *end_ms)
            .unwrap_or(false),
        EventFilter::All => true,
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
    event_queries: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// When a transaction calls `function`, emit `event_name` (under the
    /// call's package and module) after `delay`.
    pub async fn respond_to<F>(
        &self,
        function: &str,
        event_name: &str,
        delay: Duration,
        payload: F,
    ) where
        F: Fn(&SessionId) -> Value + Send + Sync + 'static,
    {
        self.state.lock().await.responders.insert(
            function.to_string(),
            Responder {
                event_name: event_name.to_string(),
                delay,
                payload: Arc::new(payload),
            },
        );
    }

    /// When a transaction calls `function`, emit `event_name` with `payload`
    /// as its first event instead of the default start-session event.
    pub async fn start_event_for<F>(&self, function: &str, event_name: &str, payload: F)
    where
        F: Fn(&SessionId) -> Value + Send + Sync + 'static,
    {
        self.state.lock().await.start_events.insert(
            function.to_string(),
            StartEvent {
                event_name: event_name.to_string(),
                payload: Arc::new(payload),
            },
        );
    }

    /// Balance of the gas coin every sender holds.
    pub async fn set_gas_balance(&self, balance: u64) {
        self.state.lock().await.gas_balance = Some(balance);
    }

    /// Use `id` for the next session instead of a random one.
    pub async fn push_session_id(&self, id: impl Into<SessionId>) {
        self.state.lock().await.session_ids.push_back(id.into());
    }

    /// Make the next submission execute with a failure status.
    pub async fn fail_next_submission(&self, error: impl Into<String>) {
        self.state
            .lock()
            .await
            .failed_submissions
            .push_back(error.into());
    }

    /// Make the next event query return `error`.
    pub async fn fail_next_query(&self, error: LedgerError) {
        self.state.lock().await.failed_queries.push_back(error);
    }

    /// The next submission executes without emitting a start-session event.
    pub async fn skip_next_start_event(&self) {
        self.state.lock().await.skip_start_events += 1;
    }

    /// Append an event to the log now.
    pub async fn emit_event(&self, event_type: impl Into<String>, payload: Value) -> EventId {
        self.emit_event_at(event_type, payload, now_ms()).await
    }

    /// Append an event carrying an explicit emission timestamp.
    pub async fn emit_event_at(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        timestamp_ms: u64,
    ) -> EventId {
        let mut state = self.state.lock().await;
        state.promote();
        let digest = state.next_digest("ext");
        state.append(&digest, 0, event_type.into(), payload, timestamp_ms);
        EventId::new(digest, 0)
    }

    /// Append an event to the log once `delay` has elapsed.
    pub async fn emit_event_after(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        delay: Duration,
    ) {
        self.state.lock().await.pending_events.push(PendingEvent {
            due: Instant::now() + delay,
            event_type: event_type.into(),
            payload,
        });
    }

    pub async fn insert_object(&self, object: ObjectData) {
        self.state
            .lock()
            .await
            .objects
            .insert(object.object_id, object);
    }

    pub async fn insert_shared_object(
        &self,
        id: ObjectId,
        initial_shared_version: u64,
        content: Value,
    ) {
        self.insert_object(ObjectData {
            object_id: id,
            version: initial_shared_version,
            digest: None,
            object_type: None,
            owner: Some(Owner::Shared {
                initial_shared_version,
            }),
            content: Some(content),
        })
        .await;
    }

    /// Insert an object owned by `owner` at version 1.
    pub async fn insert_owned_object(&self, id: ObjectId, owner: Address) {
        self.insert_object(ObjectData {
            object_id: id,
            version: 1,
            digest: Some(ObjectDigest::new(*id.as_bytes())),
            object_type: None,
            owner: Some(Owner::AddressOwner(owner)),
            content: None,
        })
        .await;
    }

    /// Replace an object once `delay` has elapsed.
    pub async fn update_object_after(&self, object: ObjectData, delay: Duration) {
        self.state.lock().await.pending_objects.push(PendingObject {
            due: Instant::now() + delay,
            object,
        });
    }

    pub async fn insert_dynamic_field(
        &self,
        parent: ObjectId,
        name: DynamicFieldName,
        object: ObjectData,
    ) {
        let info = DynamicFieldInfo {
            name,
            object_id: object.object_id,
        };
        self.state
            .lock()
            .await
            .dynamic_fields
            .entry(parent)
            .or_default()
            .push((info, object));
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of `query_events` calls served so far.
    pub fn query_count(&self) -> u64 {
        self.event_queries.load(Ordering::SeqCst)
    }

    pub async fn submitted_transactions(&self) -> Vec<TransactionData> {
        self.state.lock().await.submitted.clone()
    }

    pub async fn events(&self) -> Vec<LedgerEvent> {
        let mut state = self.state.lock().await;
        state.promote();
        state.log.clone()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit_and_execute(
        &self,
        tx: &SignedTransaction,
    ) -> Result<ExecutionResult, LedgerError> {
        let data = tx.verify()?;
        let mut state = self.state.lock().await;
        state.promote();

        let digest = state.next_digest("tx");
        state.submitted.push(data.clone());

        if let Some(error) = state.failed_submissions.pop_front() {
            debug!(%digest, %error, "In-memory ledger failing submission");
            return Ok(ExecutionResult {
                digest,
                status: ExecutionStatus::Failure { error },
                events: Vec::new(),
                created_objects: Vec::new(),
            });
        }

        let session_id = state
            .session_ids
            .pop_front()
            .unwrap_or_else(|| SessionId::from(ObjectId::random()));

        let session_call = data
            .kind
            .move_calls()
            .find(|call| call.package != FRAMEWORK_PACKAGE)
            .cloned();

        let mut events = Vec::new();
        if state.skip_start_events > 0 {
            state.skip_start_events -= 1;
        } else if let Some(call) = &session_call {
            let (event_name, payload) = match state.start_events.get(&call.function) {
                Some(start) => (start.event_name.clone(), (start.payload)(&session_id)),
                None => (
                    START_SESSION_EVENT.to_string(),
                    json!({ "session_id": session_id.as_str() }),
                ),
            };
            let event = LedgerEvent {
                id: EventId::new(digest.clone(), 0),
                event_type: format!("{}::{}::{}", call.package, call.module, event_name),
                parsed_json: payload,
                timestamp_ms: Some(now_ms()),
            };
            state.log.push(event.clone());
            events.push(event);
        }

        let now = Instant::now();
        let scheduled: Vec<PendingEvent> = data
            .kind
            .move_calls()
            .filter_map(|call| {
                state.responders.get(&call.function).map(|r| PendingEvent {
                    due: now + r.delay,
                    event_type: format!("{}::{}::{}", call.package, call.module, r.event_name),
                    payload: (r.payload)(&session_id),
                })
            })
            .collect();
        state.pending_events.extend(scheduled);

        let created_objects = vec![CreatedObject {
            object_id: ObjectId::random(),
            object_type: "session".to_string(),
        }];

        debug!(%digest, session_id = %session_id, "In-memory ledger executed transaction");

        Ok(ExecutionResult {
            digest,
            status: ExecutionStatus::Success,
            events,
            created_objects,
        })
    }

    async fn query_events(&self, query: &EventQuery) -> Result<EventPage, LedgerError> {
        self.event_queries.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(error) = state.failed_queries.pop_front() {
            return Err(error);
        }
        state.promote();

        let start = match &query.cursor {
            None => 0,
            Some(cursor) => state
                .log
                .iter()
                .position(|e| &e.id == cursor)
                .map(|p| p + 1)
                .ok_or_else(|| LedgerError::Rpc {
                    code: -32602,
                    message: format!("Unknown event cursor {}", cursor),
                })?,
        };

        let mut matching: Vec<&LedgerEvent> = state.log[start..]
            .iter()
            .filter(|e| matches_filter(e, &query.filter))
            .collect();
        if query.descending {
            matching.reverse();
        }

        let has_next_page = matching.len() > query.limit;
        let data: Vec<LedgerEvent> = matching
            .into_iter()
            .take(query.limit)
            .cloned()
            .collect();
        let next_cursor = data.last().map(|e| e.id.clone());

        Ok(EventPage {
            data,
            next_cursor,
            has_next_page,
        })
    }

    async fn get_object(
        &self,
        id: &ObjectId,
        _options: ObjectOptions,
    ) -> Result<Option<ObjectData>, LedgerError> {
        let mut state = self.state.lock().await;
        state.promote();
        Ok(state.objects.get(id).cloned())
    }

    async fn get_dynamic_fields(
        &self,
        parent: &ObjectId,
    ) -> Result<Vec<DynamicFieldInfo>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .dynamic_fields
            .get(parent)
            .map(|fields| fields.iter().map(|(info, _)| info.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_dynamic_field_object(
        &self,
        parent: &ObjectId,
        name: &DynamicFieldName,
    ) -> Result<Option<ObjectData>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.dynamic_fields.get(parent).and_then(|fields| {
            fields
                .iter()
                .find(|(info, _)| &info.name == name)
                .map(|(_, object)| object.clone())
        }))
    }

    async fn gas_coins(&self, owner: &Address) -> Result<Vec<GasCoin>, LedgerError> {
        let balance = self
            .state
            .lock()
            .await
            .gas_balance
            .unwrap_or(DEFAULT_GAS_BALANCE);
        Ok(vec![GasCoin {
            coin_object_id: ObjectId::new(*owner.as_bytes()),
            version: 1,
            digest: ObjectDigest::new([0xfe; 32]),
            balance,
        }])
    }

    async fn reference_gas_price(&self) -> Result<u64, LedgerError> {
        Ok(REFERENCE_GAS_PRICE)
    }
}
