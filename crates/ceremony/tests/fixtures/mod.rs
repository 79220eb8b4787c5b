//! Shared fixtures for ceremony integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ceremony::{
    CentralizedDkgOutput, CentralizedParty, ImportedKeyOutput, RoundChainer, SessionConfig,
    SessionRegistry, SharedRegistry, SignInputs,
};
use common::{ClientSettings, ObjectId, PollStrategy, Result, SessionId};
use ed25519_dalek::SigningKey;
use ledger::{DynamicFieldName, InMemoryLedger, ObjectData, SharedLedger};
use serde_json::{json, Value};

pub const IKA_PACKAGE: ObjectId = ObjectId::from_u8(0x01);
pub const SYSTEM_PACKAGE: ObjectId = ObjectId::from_u8(0x03);
pub const SYSTEM_OBJECT: ObjectId = ObjectId::from_u8(0x10);
pub const PROTOCOL_STATE: ObjectId = ObjectId::from_u8(0x20);
pub const NETWORK_KEY: ObjectId = ObjectId::from_u8(0x30);
pub const DWALLET: ObjectId = ObjectId::from_u8(0x40);
pub const DWALLET_CAP: ObjectId = ObjectId::from_u8(0x41);
pub const PRESIGN: ObjectId = ObjectId::from_u8(0x50);
pub const SIGN: ObjectId = ObjectId::from_u8(0x60);
pub const PARTIAL_SIGNATURES: ObjectId = ObjectId::from_u8(0x70);
pub const ENCRYPTED_SHARE: ObjectId = ObjectId::from_u8(0x80);

pub const NETWORK_DKG_OUTPUT: [u8; 2] = [7, 7];
pub const DECENTRALIZED_OUTPUT: [u8; 2] = [3, 4];

/// Delay between a round transaction and its completion event.
pub const ROUND_DELAY: Duration = Duration::from_secs(6);

/// In-memory ledger seeded with a deployment, plus the config built on it.
pub struct TestContext {
    pub ledger: Arc<InMemoryLedger>,
    pub config: Arc<SessionConfig>,
    pub registry: SharedRegistry,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    pub async fn with_strategy(strategy: PollStrategy) -> Self {
        Self::with_settings(|s| s.poll_strategy = strategy).await
    }

    /// Seed the ledger and build a config from test settings adjusted by
    /// `adjust`. Protocol-state and network-key ids are discovered through
    /// the system object.
    pub async fn with_settings(adjust: impl FnOnce(&mut ClientSettings)) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        seed_deployment(&ledger).await;

        let mut settings = ClientSettings {
            ika_package_id: Some(IKA_PACKAGE),
            ika_system_package_id: Some(SYSTEM_PACKAGE),
            system_object_id: Some(SYSTEM_OBJECT),
            timeout_ms: 60_000,
            poll_interval_ms: 5_000,
            ..Default::default()
        };
        adjust(&mut settings);

        let shared: SharedLedger = ledger.clone();
        let config = SessionConfig::new(&settings, shared, SigningKey::from_bytes(&[9; 32]))
            .expect("valid settings")
            .connect()
            .await
            .expect("deployment discovery");

        for owned in [DWALLET_CAP, PARTIAL_SIGNATURES] {
            ledger.insert_owned_object(owned, config.sender).await;
        }

        Self {
            ledger,
            config,
            registry: SessionRegistry::shared(),
        }
    }

    pub fn chainer(&self) -> RoundChainer {
        self.chainer_without_party().with_party(Arc::new(MockParty))
    }

    pub fn chainer_without_party(&self) -> RoundChainer {
        RoundChainer::new(self.config.clone(), self.registry.clone())
    }

    pub fn event_type(&self, event_name: &str) -> String {
        self.config.event_type(event_name)
    }

    /// Script the network side of a two-phase DKG. The dWallet turns
    /// `Active` after `active_after`.
    pub async fn script_dkg(&self, active_after: Duration) {
        self.ledger
            .respond_to(
                "request_dkg_first_round",
                "DKGFirstRoundOutputEvent",
                ROUND_DELAY,
                |sid| {
                    json!({
                        "session_id": sid.as_str(),
                        "dwallet_id": DWALLET.to_hex(),
                        "dwallet_cap_id": DWALLET_CAP.to_hex(),
                        "first_round_output": [1, 2],
                    })
                },
            )
            .await;
        self.ledger
            .respond_to(
                "request_dkg_second_round",
                "CompletedDKGSecondRoundEvent",
                ROUND_DELAY,
                |sid| {
                    json!({
                        "session_id": sid.as_str(),
                        "dwallet_id": DWALLET.to_hex(),
                        "dwallet_cap_id": DWALLET_CAP.to_hex(),
                        "public_output": DECENTRALIZED_OUTPUT,
                    })
                },
            )
            .await;
        self.ledger
            .update_object_after(dwallet_object("Active"), active_after)
            .await;
    }

    /// Script the network side of importing a key. The dWallet turns
    /// `Active` after `active_after`.
    pub async fn script_imported_key(&self, active_after: Duration) {
        self.ledger
            .start_event_for(
                "new_imported_key_dwallet",
                "NewImportedKeyDWalletEvent",
                |_| {
                    json!({
                        "dwallet_id": DWALLET.to_hex(),
                        "dwallet_cap_id": DWALLET_CAP.to_hex(),
                    })
                },
            )
            .await;
        self.ledger
            .start_event_for(
                "request_imported_key_dwallet_verification",
                "DWalletImportedKeyVerificationRequestEvent",
                |sid| {
                    json!({
                        "session_id": sid.as_str(),
                        "event_data": {
                            "encrypted_user_secret_key_share_id": ENCRYPTED_SHARE.to_hex(),
                        },
                    })
                },
            )
            .await;
        self.ledger
            .update_object_after(dwallet_object("Active"), active_after)
            .await;
    }

    pub async fn script_presign(&self, delay: Duration) {
        self.ledger
            .respond_to(
                "request_ecdsa_presign",
                "CompletedECDSAPresignEvent",
                delay,
                presign_payload,
            )
            .await;
    }

    pub async fn script_sign(&self) {
        self.ledger
            .respond_to(
                "request_ecdsa_sign",
                "CompletedECDSASignEvent",
                ROUND_DELAY,
                |sid| sign_payload(sid, false),
            )
            .await;
    }

    pub async fn script_future_sign(&self) {
        self.ledger
            .respond_to(
                "request_future_sign",
                "CompletedPartialSignaturesEvent",
                ROUND_DELAY,
                |sid| {
                    json!({
                        "session_id": sid.as_str(),
                        "partial_centralized_signed_messages_id": PARTIAL_SIGNATURES.to_hex(),
                    })
                },
            )
            .await;
        self.ledger
            .respond_to(
                "sign_with_partial_centralized_message_signatures",
                "CompletedECDSASignEvent",
                ROUND_DELAY,
                |sid| sign_payload(sid, true),
            )
            .await;
    }
}

async fn seed_deployment(ledger: &InMemoryLedger) {
    ledger
        .insert_dynamic_field(
            SYSTEM_OBJECT,
            DynamicFieldName {
                type_: "u64".into(),
                value: json!("0"),
            },
            ObjectData {
                object_id: ObjectId::from_u8(0x11),
                version: 1,
                digest: None,
                object_type: None,
                owner: None,
                content: Some(json!({
                    "fields": { "value": { "fields": {
                        "dwallet_2pc_mpc_secp256k1_id": PROTOCOL_STATE.to_hex(),
                        "dwallet_network_decryption_key": { "fields": {
                            "dwallet_network_decryption_key_id": NETWORK_KEY.to_hex(),
                        }},
                    }}}
                })),
            },
        )
        .await;

    ledger
        .insert_shared_object(PROTOCOL_STATE, 1, json!({ "fields": {} }))
        .await;
    ledger
        .insert_object(ObjectData {
            object_id: NETWORK_KEY,
            version: 1,
            digest: None,
            object_type: None,
            owner: None,
            content: Some(json!({
                "fields": { "network_dkg_public_output": NETWORK_DKG_OUTPUT }
            })),
        })
        .await;
}

pub fn dwallet_object(variant: &str) -> ObjectData {
    ObjectData {
        object_id: DWALLET,
        version: 2,
        digest: None,
        object_type: None,
        owner: None,
        content: Some(json!({
            "fields": { "state": {
                "variant": variant,
                "fields": { "public_output": DECENTRALIZED_OUTPUT },
            }}
        })),
    }
}

pub fn presign_payload(sid: &SessionId) -> Value {
    json!({
        "session_id": sid.as_str(),
        "presign_id": PRESIGN.to_hex(),
        "presign": [5, 5],
    })
}

pub fn sign_payload(sid: &SessionId, is_future_sign: bool) -> Value {
    json!({
        "session_id": sid.as_str(),
        "sign_id": SIGN.to_hex(),
        "signature": [0xaa, 0xbb],
        "is_future_sign": is_future_sign,
    })
}

/// Formatted log output of the thread it is installed on.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's debug-level logs into a new capture until the
    /// guard drops.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// True when a `ceremony_event` of `event_type` was logged.
    pub fn has_event(&self, event_type: &str) -> bool {
        self.contents()
            .contains(&format!("\"event_type\":\"{}\"", event_type))
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Deterministic stand-in for the native computation module.
pub struct MockParty;

impl MockParty {
    pub fn signature(message: &[u8], presign: &[u8]) -> Vec<u8> {
        [message, presign].concat()
    }

    /// Network message of an imported key.
    pub fn imported_key_message(network_public_output: &[u8], dwallet_id: &ObjectId) -> Vec<u8> {
        [network_public_output, dwallet_id.as_bytes()].concat()
    }
}

impl CentralizedParty for MockParty {
    fn dkg_centralized_step(
        &self,
        network_public_output: &[u8],
        first_round_output: &[u8],
        _first_round_session_id: &SessionId,
    ) -> Result<CentralizedDkgOutput> {
        Ok(CentralizedDkgOutput {
            public_key_share_and_proof: first_round_output.to_vec(),
            centralized_public_output: network_public_output.to_vec(),
            secret_share: vec![0x5e],
        })
    }

    fn imported_key_centralized_step(
        &self,
        network_public_output: &[u8],
        dwallet_id: &ObjectId,
        secret_key: &[u8],
    ) -> Result<ImportedKeyOutput> {
        Ok(ImportedKeyOutput {
            centralized_party_message: Self::imported_key_message(
                network_public_output,
                dwallet_id,
            ),
            encrypted_secret_share_and_proof: secret_key.iter().rev().copied().collect(),
            public_output: vec![0x1b],
            secret_share: secret_key.to_vec(),
        })
    }

    fn sign_centralized_step(&self, inputs: SignInputs<'_>) -> Result<Vec<u8>> {
        Ok(Self::signature(inputs.message, inputs.presign))
    }
}
