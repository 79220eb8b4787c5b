//! The ledger collaborator interface and its wire types.
//!
//! Field names follow the node's JSON-RPC encoding so the same types can
//! be deserialized straight from responses.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use common::{string_or_u64, Address, EventId, LedgerError, LedgerEvent, ObjectId};

use crate::transaction::{ObjectDigest, ObjectRef, SignedTransaction};

// ============================================================================
// Objects
// ============================================================================

/// Ownership of a ledger object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Owner {
    AddressOwner(ObjectId),
    ObjectOwner(ObjectId),
    Shared {
        #[serde(deserialize_with = "string_or_u64")]
        initial_shared_version: u64,
    },
    Immutable,
}

/// Which parts of an object to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectOptions {
    pub show_type: bool,
    pub show_owner: bool,
    pub show_content: bool,
}

impl ObjectOptions {
    pub fn full() -> Self {
        Self {
            show_type: true,
            show_owner: true,
            show_content: true,
        }
    }

    pub fn owner_only() -> Self {
        Self {
            show_type: false,
            show_owner: true,
            show_content: false,
        }
    }
}

impl Default for ObjectOptions {
    fn default() -> Self {
        Self::full()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectData {
    pub object_id: ObjectId,
    #[serde(deserialize_with = "string_or_u64")]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<ObjectDigest>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl ObjectData {
    /// The `fields` map of a Move object's content.
    pub fn fields(&self) -> Option<&Value> {
        self.content.as_ref().and_then(|c| c.get("fields"))
    }

    /// Reference to this exact version, for use as an owned input.
    pub fn object_ref(&self) -> Option<ObjectRef> {
        self.digest.map(|digest| ObjectRef {
            object_id: self.object_id,
            version: self.version,
            digest,
        })
    }
}

/// A gas coin owned by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasCoin {
    pub coin_object_id: ObjectId,
    #[serde(deserialize_with = "string_or_u64")]
    pub version: u64,
    pub digest: ObjectDigest,
    #[serde(deserialize_with = "string_or_u64")]
    pub balance: u64,
}

impl GasCoin {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            object_id: self.coin_object_id,
            version: self.version,
            digest: self.digest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicFieldName {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicFieldInfo {
    pub name: DynamicFieldName,
    pub object_id: ObjectId,
}

// ============================================================================
// Events
// ============================================================================

/// Event log filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Events of one fully-qualified Move type.
    MoveEventType(String),
    /// Events emitted within `[start_ms, end_ms]`.
    TimeRange { start_ms: u64, end_ms: u64 },
    All,
}

impl EventFilter {
    /// JSON-RPC encoding of the filter.
    pub fn to_json(&self) -> Value {
        match self {
            EventFilter::MoveEventType(ty) => json!({ "MoveEventType": ty }),
            EventFilter::TimeRange { start_ms, end_ms } => json!({
                "TimeRange": {
                    "startTime": start_ms.to_string(),
                    "endTime": end_ms.to_string(),
                }
            }),
            EventFilter::All => json!({ "All": [] }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub filter: EventFilter,
    /// Return events strictly after this one.
    pub cursor: Option<EventId>,
    pub limit: usize,
    pub descending: bool,
}

impl EventQuery {
    pub fn new(filter: EventFilter, limit: usize) -> Self {
        Self {
            filter,
            cursor: None,
            limit,
            descending: false,
        }
    }

    pub fn after(mut self, cursor: Option<EventId>) -> Self {
        self.cursor = cursor;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub data: Vec<LedgerEvent>,
    #[serde(default)]
    pub next_cursor: Option<EventId>,
    #[serde(default)]
    pub has_next_page: bool,
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure { error: String },
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedObject {
    pub object_id: ObjectId,
    pub object_type: String,
}

/// Result of submitting a transaction and waiting for it to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub digest: String,
    pub status: ExecutionStatus,
    /// Events in emission order.
    pub events: Vec<LedgerEvent>,
    pub created_objects: Vec<CreatedObject>,
}

// ============================================================================
// Client trait
// ============================================================================

/// Read and write access to the ledger.
///
/// Implementations must be shareable across ceremonies running in parallel.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a signed transaction and wait until it has executed.
    async fn submit_and_execute(
        &self,
        tx: &SignedTransaction,
    ) -> Result<ExecutionResult, LedgerError>;

    async fn query_events(&self, query: &EventQuery) -> Result<EventPage, LedgerError>;

    /// `Ok(None)` when the object does not exist.
    async fn get_object(
        &self,
        id: &ObjectId,
        options: ObjectOptions,
    ) -> Result<Option<ObjectData>, LedgerError>;

    async fn get_dynamic_fields(&self, parent: &ObjectId)
        -> Result<Vec<DynamicFieldInfo>, LedgerError>;

    async fn get_dynamic_field_object(
        &self,
        parent: &ObjectId,
        name: &DynamicFieldName,
    ) -> Result<Option<ObjectData>, LedgerError>;

    /// Native gas coins owned by `owner`.
    async fn gas_coins(&self, owner: &Address) -> Result<Vec<GasCoin>, LedgerError>;

    async fn reference_gas_price(&self) -> Result<u64, LedgerError>;
}

pub type SharedLedger = Arc<dyn LedgerClient>;
