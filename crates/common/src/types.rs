//! Core identifiers and round outputs shared by every ceremony component.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ParseIdError;
use crate::events::EventId;

/// A 32-byte ledger object identifier.
///
/// Rendered as `0x`-prefixed lowercase hex. Short forms such as `0x2` are
/// left-padded with zeros when parsed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; 32]);

/// Ledger account addresses share the object id encoding.
pub type Address = ObjectId;

impl ObjectId {
    /// Number of raw bytes in an identifier.
    pub const LENGTH: usize = 32;

    /// The all-zero identifier.
    pub const ZERO: ObjectId = ObjectId([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random identifier.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Build the identifier whose last byte is `value` (e.g. `0x2`).
    pub const fn from_u8(value: u8) -> Self {
        let mut bytes = [0u8; 32];
        bytes[31] = value;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() || digits.len() > Self::LENGTH * 2 {
            return Err(ParseIdError::InvalidLength {
                input: s.to_string(),
                len: digits.len(),
            });
        }

        let padded = format!("{:0>64}", digits);
        let decoded = hex::decode(&padded).map_err(|e| ParseIdError::InvalidHex {
            input: s.to_string(),
            reason: e.to_string(),
        })?;

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

/// Hex string in JSON; the raw 32 bytes in binary encodings.
impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Self)
        }
    }
}

/// Opaque correlation token minted by the ledger for one ceremony round.
///
/// Ids that look like `0x`-prefixed object ids are canonicalized so that
/// `0x01` and its zero-padded form compare equal. Anything else is kept
/// verbatim.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref().trim();
        if raw.starts_with("0x") || raw.starts_with("0X") {
            if let Ok(id) = raw.parse::<ObjectId>() {
                return Self(id.to_hex());
            }
        }
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl From<ObjectId> for SessionId {
    fn from(id: ObjectId) -> Self {
        Self(id.to_hex())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}

/// The kind of ceremony round a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    DkgFirstRound,
    DkgSecondRound,
    Presign,
    Sign,
    FutureSign,
    CompleteFutureSign,
    ImportedKey,
    ImportedKeyVerification,
}

impl fmt::Display for RoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DkgFirstRound => "dkg_first_round",
            Self::DkgSecondRound => "dkg_second_round",
            Self::Presign => "presign",
            Self::Sign => "sign",
            Self::FutureSign => "future_sign",
            Self::CompleteFutureSign => "complete_future_sign",
            Self::ImportedKey => "imported_key",
            Self::ImportedKeyVerification => "imported_key_verification",
        };
        f.write_str(s)
    }
}

/// Hash function applied to messages before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hash {
    #[default]
    Keccak256,
    Sha256,
}

impl Hash {
    /// On-ledger encoding of the hash scheme.
    pub fn as_u8(self) -> u8 {
        match self {
            Hash::Keccak256 => 0,
            Hash::Sha256 => 1,
        }
    }
}

impl FromStr for Hash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keccak256" | "keccak" | "0" => Ok(Hash::Keccak256),
            "sha256" | "sha-256" | "1" => Ok(Hash::Sha256),
            _ => Err(format!("Unknown hash scheme: {}", s)),
        }
    }
}

/// A reference to mutable shared ledger state, valid for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedObjectRef {
    pub object_id: ObjectId,
    pub initial_shared_version: u64,
    pub mutable: bool,
}

/// One ceremony round in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Ledger-assigned session id.
    pub session_id: SessionId,
    pub round: RoundKind,
    pub started_at: DateTime<Utc>,
    /// Id of the start-session event. Cursor-based polling resumes after it.
    pub start_event: Option<EventId>,
    /// Digest of the initiating transaction.
    pub tx_digest: String,
}

impl SessionHandle {
    pub fn new(session_id: SessionId, round: RoundKind, tx_digest: impl Into<String>) -> Self {
        Self {
            session_id,
            round,
            started_at: Utc::now(),
            start_event: None,
            tx_digest: tx_digest.into(),
        }
    }

    pub fn with_start_event(mut self, event: EventId) -> Self {
        self.start_event = Some(event);
        self
    }
}

/// Output of the first DKG round, emitted by the MPC network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgFirstRoundOutput {
    pub session_id: SessionId,
    pub dwallet_id: ObjectId,
    pub dwallet_cap_id: ObjectId,
    pub first_round_output: Vec<u8>,
}

/// Completion of the second DKG round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgSecondRoundOutput {
    pub session_id: SessionId,
    pub dwallet_id: ObjectId,
    pub dwallet_cap_id: ObjectId,
    pub decentralized_public_output: Vec<u8>,
}

/// Everything a caller needs from a finished DKG ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgOutput {
    pub dwallet_id: ObjectId,
    pub dwallet_cap_id: ObjectId,
    pub centralized_public_output: Vec<u8>,
    pub decentralized_public_output: Vec<u8>,
    /// The user's secret key share. Never leaves the client.
    pub secret_share: Vec<u8>,
}

/// A dWallet created from an existing secret key and verified by the
/// network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedDWalletOutput {
    pub dwallet_id: ObjectId,
    pub dwallet_cap_id: ObjectId,
    pub encrypted_secret_share_id: ObjectId,
    /// The user's secret key share. Never leaves the client.
    pub secret_share: Vec<u8>,
    /// Public output of the `Active` dWallet.
    pub public_output: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignOutput {
    pub session_id: SessionId,
    pub presign_id: ObjectId,
    pub presign: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOutput {
    pub session_id: SessionId,
    pub sign_id: ObjectId,
    pub signature: Vec<u8>,
    pub is_future_sign: bool,
}

/// Verified partial signatures produced by a future-sign request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignaturesOutput {
    pub session_id: SessionId,
    pub partial_signatures_id: ObjectId,
}

/// Lifecycle state of a dWallet object as stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DWalletState {
    AwaitingNetworkDkg,
    AwaitingUser,
    AwaitingNetworkVerification,
    Active { public_output: Vec<u8> },
    Rejected,
    Other(String),
}

impl DWalletState {
    /// Decode the `state` field of a dWallet object's content.
    ///
    /// Accepts the enum encoding `{"variant": "Active", "fields": {...}}`.
    pub fn from_content(content: &Value) -> Option<Self> {
        let state = content.get("fields").unwrap_or(content).get("state")?;
        let variant = state.get("variant")?.as_str()?;

        let parsed = match variant {
            "AwaitingNetworkDKG" | "AwaitingNetworkDkg" => Self::AwaitingNetworkDkg,
            "AwaitingUser" => Self::AwaitingUser,
            "AwaitingNetworkVerification" => Self::AwaitingNetworkVerification,
            "Active" => {
                let public_output = state
                    .get("fields")
                    .and_then(|f| f.get("public_output"))
                    .map(|v| serde_json::from_value::<Vec<u8>>(v.clone()))
                    .transpose()
                    .ok()?
                    .unwrap_or_default();
                Self::Active { public_output }
            }
            "NetworkRejectedDKGVerification" | "Rejected" => Self::Rejected,
            other => Self::Other(other.to_string()),
        };
        Some(parsed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}
