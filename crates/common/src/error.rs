//! Error types for ledger access and ceremony orchestration.

use std::time::Duration;

use thiserror::Error;

use crate::types::{ObjectId, RoundKind};

/// Failures talking to the ledger node.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger transport error: {0}")]
    Transport(String),

    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Failed to decode ledger response: {0}")]
    Decode(String),

    #[error("Transaction signing failed: {0}")]
    Signing(String),
}

impl LedgerError {
    /// Transport failures are the only ones worth polling through.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Decode(e.to_string())
    }
}

/// Errors surfaced by the ceremony client.
#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Object is not shared: {0}")]
    NotSharedObject(ObjectId),

    #[error("{round} transaction {digest} failed: {error}")]
    RoundExecutionFailed {
        round: RoundKind,
        digest: String,
        error: String,
    },

    #[error("Invalid start session event: {0}")]
    InvalidStartSessionEvent(String),

    #[error(
        "Timeout: {event_type} event not received within {:.2} minutes",
        .elapsed.as_secs_f64() / 60.0
    )]
    SessionTimeout {
        event_type: String,
        elapsed: Duration,
    },

    #[error("Malformed {event_type} event: {reason}")]
    MalformedCompletionEvent { event_type: String, reason: String },

    #[error("Object {object_id} did not reach the expected state within {elapsed:?}")]
    ObjectStateTimeout {
        object_id: ObjectId,
        elapsed: Duration,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Session already registered: {0}")]
    DuplicateSession(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Centralized computation failed: {0}")]
    Computation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Why an identifier string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdError {
    #[error("Invalid id length {len} in {input:?}")]
    InvalidLength { input: String, len: usize },

    #[error("Invalid hex in {input:?}: {reason}")]
    InvalidHex { input: String, reason: String },
}

impl From<ParseIdError> for CeremonyError {
    fn from(e: ParseIdError) -> Self {
        CeremonyError::Configuration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CeremonyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_in_minutes() {
        let err = CeremonyError::SessionTimeout {
            event_type: "CompletedECDSAPresignEvent".into(),
            elapsed: Duration::from_secs(90),
        };
        assert_eq!(
            err.to_string(),
            "Timeout: CompletedECDSAPresignEvent event not received within 1.50 minutes"
        );
    }

    #[test]
    fn test_ledger_error_converts() {
        let err: CeremonyError = LedgerError::Transport("refused".into()).into();
        assert!(matches!(err, CeremonyError::Ledger(LedgerError::Transport(_))));
        assert_eq!(err.to_string(), "Ledger transport error: refused");
    }

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Transport("x".into()).is_transient());
        assert!(!LedgerError::Decode("x".into()).is_transient());
        assert!(!LedgerError::Rpc {
            code: -32000,
            message: "x".into()
        }
        .is_transient());
    }
}
