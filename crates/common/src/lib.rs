//! Shared types for the dWallet ceremony client.

pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod types;

pub use crate::config::{validate_polling, ClientSettings, PollStrategy};
pub use crate::error::{CeremonyError, LedgerError, ParseIdError, Result};
pub use crate::events::{
    opt_string_or_u64, string_or_u64, CompletionEvent, CompletionKind, EventId,
    ImportedKeyVerificationEvent, LedgerEvent, NewImportedKeyEvent, StartSessionEvent,
};
pub use crate::observability::{CeremonyMetrics, EventType, LogEvent, MetricsSnapshot};
pub use crate::types::{
    Address, DWalletState, DkgFirstRoundOutput, DkgOutput, DkgSecondRoundOutput, Hash,
    ImportedDWalletOutput, ObjectId, PartialSignaturesOutput, PresignOutput, RoundKind,
    SessionHandle, SessionId, SharedObjectRef, SignOutput,
};
