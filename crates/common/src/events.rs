//! Ledger event shapes and the completion-event tagged union.
//!
//! Raw events arrive as JSON from the ledger's event log. They are decoded
//! once, at the query boundary, into [`CompletionEvent`]; everything past
//! that point works with typed payloads.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{CeremonyError, Result};
use crate::types::{
    DkgFirstRoundOutput, DkgSecondRoundOutput, ObjectId, PartialSignaturesOutput, PresignOutput,
    SessionId, SignOutput,
};

/// Position of an event in the ledger's event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    #[serde(rename = "txDigest")]
    pub tx_digest: String,
    #[serde(
        rename = "eventSeq",
        serialize_with = "u64_as_string",
        deserialize_with = "string_or_u64"
    )]
    pub event_seq: u64,
}

impl EventId {
    pub fn new(tx_digest: impl Into<String>, event_seq: u64) -> Self {
        Self {
            tx_digest: tx_digest.into(),
            event_seq,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_digest, self.event_seq)
    }
}

/// JSON-RPC nodes encode `u64` fields (`eventSeq`, versions, timestamps) as
/// decimal strings. Accepts either form.
pub fn string_or_u64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(u64),
        Str(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Num(n) => Ok(n),
        Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Write a `u64` as a decimal string, the only form nodes accept in
/// request parameters.
pub fn u64_as_string<S: Serializer>(
    value: &u64,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn opt_string_or_u64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(u64),
        Str(String),
    }

    match Option::<Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Repr::Num(n)) => Ok(Some(n)),
        Some(Repr::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// A single event as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: EventId,
    /// Fully-qualified Move event type, e.g. `0xabc::module::Event`.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "parsedJson", default)]
    pub parsed_json: Value,
    #[serde(
        rename = "timestampMs",
        default,
        deserialize_with = "opt_string_or_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp_ms: Option<u64>,
}

impl LedgerEvent {
    /// The `session_id` field of the payload, if there is one.
    pub fn payload_session_id(&self) -> Option<SessionId> {
        payload_session_id(&self.parsed_json)
    }

    /// True when the event type ends with `::<name>`, ignoring generics.
    pub fn is_named(&self, name: &str) -> bool {
        type_name(&self.event_type) == name
    }
}

/// Last path segment of a Move type with generic parameters stripped.
pub fn type_name(event_type: &str) -> &str {
    let base = event_type.split('<').next().unwrap_or(event_type);
    base.rsplit("::").next().unwrap_or(base)
}

/// Extract `session_id` from an event payload.
///
/// Completion events may wrap the payload in `event_data`, so both levels
/// are checked.
pub fn payload_session_id(payload: &Value) -> Option<SessionId> {
    let raw = payload
        .get("session_id")
        .or_else(|| payload.get("event_data").and_then(|d| d.get("session_id")))?;
    raw.as_str().map(SessionId::new)
}

/// The event emitted first by every session-initiating transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartSessionEvent {
    pub session_id: SessionId,
}

impl StartSessionEvent {
    pub fn from_event(event: &LedgerEvent) -> Option<Self> {
        payload_session_id(&event.parsed_json).map(|session_id| Self { session_id })
    }
}

/// First event of `new_imported_key_dwallet`: the dWallet created for an
/// imported key, before its key share is verified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewImportedKeyEvent {
    pub dwallet_id: ObjectId,
    pub dwallet_cap_id: ObjectId,
}

impl NewImportedKeyEvent {
    pub fn from_event(event: &LedgerEvent) -> Option<Self> {
        serde_json::from_value(event.parsed_json.clone()).ok()
    }
}

/// First event of `request_imported_key_dwallet_verification`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedKeyVerificationEvent {
    pub encrypted_user_secret_key_share_id: ObjectId,
}

impl ImportedKeyVerificationEvent {
    pub fn from_event(event: &LedgerEvent) -> Option<Self> {
        let id = event
            .parsed_json
            .get("event_data")?
            .get("encrypted_user_secret_key_share_id")?;
        serde_json::from_value(id.clone())
            .ok()
            .map(|encrypted_user_secret_key_share_id| Self {
                encrypted_user_secret_key_share_id,
            })
    }
}

/// Which completion event a caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionKind {
    DkgFirstRound,
    DkgSecondRound,
    Presign,
    Sign,
    PartialSignatures,
}

impl CompletionKind {
    /// Unqualified Move event struct name.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::DkgFirstRound => "DKGFirstRoundOutputEvent",
            Self::DkgSecondRound => "CompletedDKGSecondRoundEvent",
            Self::Presign => "CompletedECDSAPresignEvent",
            Self::Sign => "CompletedECDSASignEvent",
            Self::PartialSignatures => "CompletedPartialSignaturesEvent",
        }
    }

    /// Fully-qualified event type under `package::module`.
    pub fn event_type(self, package: &ObjectId, module: &str) -> String {
        format!("{}::{}::{}", package, module, self.event_name())
    }
}

impl fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// A decoded completion event. Each variant carries the typed payload of
/// one completion event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    DkgFirstRound(DkgFirstRoundOutput),
    DkgSecondRound(DkgSecondRoundOutput),
    Presign(PresignOutput),
    Sign(SignOutput),
    PartialSignatures(PartialSignaturesOutput),
}

#[derive(Deserialize)]
struct DkgFirstRoundWire {
    session_id: SessionId,
    dwallet_id: ObjectId,
    dwallet_cap_id: ObjectId,
    #[serde(alias = "output")]
    first_round_output: Vec<u8>,
}

#[derive(Deserialize)]
struct DkgSecondRoundWire {
    session_id: SessionId,
    dwallet_id: ObjectId,
    dwallet_cap_id: ObjectId,
    #[serde(alias = "public_output")]
    decentralized_public_output: Vec<u8>,
}

#[derive(Deserialize)]
struct PresignWire {
    session_id: SessionId,
    presign_id: ObjectId,
    presign: Vec<u8>,
}

#[derive(Deserialize)]
struct SignWire {
    session_id: SessionId,
    sign_id: ObjectId,
    signature: Vec<u8>,
    is_future_sign: bool,
}

#[derive(Deserialize)]
struct PartialSignaturesWire {
    session_id: SessionId,
    #[serde(alias = "partial_signatures_id")]
    partial_centralized_signed_messages_id: ObjectId,
}

impl CompletionEvent {
    /// Decode `payload` as the variant selected by `kind`.
    ///
    /// A payload missing any required field, or carrying one of the wrong
    /// type, yields [`CeremonyError::MalformedCompletionEvent`].
    pub fn decode(kind: CompletionKind, payload: &Value) -> Result<Self> {
        let body = payload.get("event_data").unwrap_or(payload).clone();
        let malformed = |e: serde_json::Error| CeremonyError::MalformedCompletionEvent {
            event_type: kind.event_name().to_string(),
            reason: e.to_string(),
        };

        let event = match kind {
            CompletionKind::DkgFirstRound => {
                let w: DkgFirstRoundWire = serde_json::from_value(body).map_err(malformed)?;
                Self::DkgFirstRound(DkgFirstRoundOutput {
                    session_id: w.session_id,
                    dwallet_id: w.dwallet_id,
                    dwallet_cap_id: w.dwallet_cap_id,
                    first_round_output: w.first_round_output,
                })
            }
            CompletionKind::DkgSecondRound => {
                let w: DkgSecondRoundWire = serde_json::from_value(body).map_err(malformed)?;
                Self::DkgSecondRound(DkgSecondRoundOutput {
                    session_id: w.session_id,
                    dwallet_id: w.dwallet_id,
                    dwallet_cap_id: w.dwallet_cap_id,
                    decentralized_public_output: w.decentralized_public_output,
                })
            }
            CompletionKind::Presign => {
                let w: PresignWire = serde_json::from_value(body).map_err(malformed)?;
                Self::Presign(PresignOutput {
                    session_id: w.session_id,
                    presign_id: w.presign_id,
                    presign: w.presign,
                })
            }
            CompletionKind::Sign => {
                let w: SignWire = serde_json::from_value(body).map_err(malformed)?;
                Self::Sign(SignOutput {
                    session_id: w.session_id,
                    sign_id: w.sign_id,
                    signature: w.signature,
                    is_future_sign: w.is_future_sign,
                })
            }
            CompletionKind::PartialSignatures => {
                let w: PartialSignaturesWire = serde_json::from_value(body).map_err(malformed)?;
                Self::PartialSignatures(PartialSignaturesOutput {
                    session_id: w.session_id,
                    partial_signatures_id: w.partial_centralized_signed_messages_id,
                })
            }
        };
        Ok(event)
    }

    pub fn kind(&self) -> CompletionKind {
        match self {
            Self::DkgFirstRound(_) => CompletionKind::DkgFirstRound,
            Self::DkgSecondRound(_) => CompletionKind::DkgSecondRound,
            Self::Presign(_) => CompletionKind::Presign,
            Self::Sign(_) => CompletionKind::Sign,
            Self::PartialSignatures(_) => CompletionKind::PartialSignatures,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::DkgFirstRound(o) => &o.session_id,
            Self::DkgSecondRound(o) => &o.session_id,
            Self::Presign(o) => &o.session_id,
            Self::Sign(o) => &o.session_id,
            Self::PartialSignatures(o) => &o.session_id,
        }
    }

    pub fn into_dkg_first_round(self) -> Result<DkgFirstRoundOutput> {
        match self {
            Self::DkgFirstRound(o) => Ok(o),
            other => Err(other.unexpected(CompletionKind::DkgFirstRound)),
        }
    }

    pub fn into_dkg_second_round(self) -> Result<DkgSecondRoundOutput> {
        match self {
            Self::DkgSecondRound(o) => Ok(o),
            other => Err(other.unexpected(CompletionKind::DkgSecondRound)),
        }
    }

    pub fn into_presign(self) -> Result<PresignOutput> {
        match self {
            Self::Presign(o) => Ok(o),
            other => Err(other.unexpected(CompletionKind::Presign)),
        }
    }

    pub fn into_sign(self) -> Result<SignOutput> {
        match self {
            Self::Sign(o) => Ok(o),
            other => Err(other.unexpected(CompletionKind::Sign)),
        }
    }

    pub fn into_partial_signatures(self) -> Result<PartialSignaturesOutput> {
        match self {
            Self::PartialSignatures(o) => Ok(o),
            other => Err(other.unexpected(CompletionKind::PartialSignatures)),
        }
    }

    fn unexpected(&self, wanted: CompletionKind) -> CeremonyError {
        CeremonyError::MalformedCompletionEvent {
            event_type: wanted.event_name().to_string(),
            reason: format!("got {} instead", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(n: u8) -> String {
        ObjectId::from_u8(n).to_hex()
    }

    #[test]
    fn test_event_id_accepts_string_seq() {
        let parsed: EventId =
            serde_json::from_value(json!({ "txDigest": "abc", "eventSeq": "7" })).unwrap();
        assert_eq!(parsed, EventId::new("abc", 7));

        let parsed: EventId =
            serde_json::from_value(json!({ "txDigest": "abc", "eventSeq": 3 })).unwrap();
        assert_eq!(parsed.event_seq, 3);
    }

    #[test]
    fn test_event_id_serializes_seq_as_string() {
        let value = serde_json::to_value(EventId::new("D1", 0)).unwrap();
        assert_eq!(value, json!({ "txDigest": "D1", "eventSeq": "0" }));

        let back: EventId = serde_json::from_value(value).unwrap();
        assert_eq!(back, EventId::new("D1", 0));
    }

    #[test]
    fn test_ledger_event_wire_shape() {
        let event: LedgerEvent = serde_json::from_value(json!({
            "id": { "txDigest": "d1", "eventSeq": "0" },
            "type": "0x3::dwallet_2pc_mpc_secp256k1::CompletedECDSAPresignEvent",
            "parsedJson": { "session_id": "S1" },
            "timestampMs": "1700000000000"
        }))
        .unwrap();

        assert_eq!(event.timestamp_ms, Some(1_700_000_000_000));
        assert!(event.is_named("CompletedECDSAPresignEvent"));
        assert_eq!(event.payload_session_id(), Some(SessionId::new("S1")));
    }

    #[test]
    fn test_type_name_strips_generics() {
        assert_eq!(
            type_name("0x3::m::StartSessionEvent<0x3::m::Inner>"),
            "StartSessionEvent"
        );
        assert_eq!(type_name("Plain"), "Plain");
    }

    #[test]
    fn test_session_id_inside_event_data() {
        let payload = json!({ "event_data": { "session_id": "S2" } });
        assert_eq!(payload_session_id(&payload), Some(SessionId::new("S2")));
        assert_eq!(payload_session_id(&json!({ "other": 1 })), None);
    }

    #[test]
    fn test_imported_key_events() {
        let created = LedgerEvent {
            id: EventId::new("D1", 0),
            event_type: "0x3::m::NewImportedKeyDWalletEvent".into(),
            parsed_json: json!({ "dwallet_id": id(4), "dwallet_cap_id": id(5) }),
            timestamp_ms: None,
        };
        let event = NewImportedKeyEvent::from_event(&created).unwrap();
        assert_eq!(event.dwallet_id, ObjectId::from_u8(4));
        assert_eq!(event.dwallet_cap_id, ObjectId::from_u8(5));
        assert!(ImportedKeyVerificationEvent::from_event(&created).is_none());

        let verification = LedgerEvent {
            parsed_json: json!({
                "event_data": { "encrypted_user_secret_key_share_id": id(6) }
            }),
            ..created
        };
        assert_eq!(
            ImportedKeyVerificationEvent::from_event(&verification)
                .unwrap()
                .encrypted_user_secret_key_share_id,
            ObjectId::from_u8(6)
        );
        assert!(NewImportedKeyEvent::from_event(&verification).is_none());
    }

    #[test]
    fn test_decode_presign() {
        let payload = json!({ "session_id": "S1", "presign_id": id(9), "presign": [1, 2] });
        let event = CompletionEvent::decode(CompletionKind::Presign, &payload).unwrap();
        assert_eq!(event.session_id().as_str(), "S1");
        let out = event.into_presign().unwrap();
        assert_eq!(out.presign_id, ObjectId::from_u8(9));
        assert_eq!(out.presign, vec![1, 2]);
    }

    #[test]
    fn test_decode_sign_requires_flag() {
        let payload = json!({ "session_id": "S1", "sign_id": id(1), "signature": [5] });
        let err = CompletionEvent::decode(CompletionKind::Sign, &payload).unwrap_err();
        assert!(matches!(err, CeremonyError::MalformedCompletionEvent { .. }));
    }

    #[test]
    fn test_decode_dkg_wrapped_payload() {
        let payload = json!({
            "event_data": {
                "session_id": "S3",
                "dwallet_id": id(1),
                "dwallet_cap_id": id(2),
                "public_output": [7, 7]
            }
        });
        let out = CompletionEvent::decode(CompletionKind::DkgSecondRound, &payload)
            .unwrap()
            .into_dkg_second_round()
            .unwrap();
        assert_eq!(out.decentralized_public_output, vec![7, 7]);
        assert_eq!(out.dwallet_cap_id, ObjectId::from_u8(2));
    }

    #[test]
    fn test_wrong_variant_accessor() {
        let payload = json!({ "session_id": "S1", "presign_id": id(9), "presign": [] });
        let event = CompletionEvent::decode(CompletionKind::Presign, &payload).unwrap();
        assert!(event.into_sign().is_err());
    }

    #[test]
    fn test_event_type_formatting() {
        let pkg = ObjectId::from_u8(3);
        assert_eq!(
            CompletionKind::Sign.event_type(&pkg, "dwallet_2pc_mpc_secp256k1"),
            format!("{}::dwallet_2pc_mpc_secp256k1::CompletedECDSASignEvent", pkg)
        );
    }
}
