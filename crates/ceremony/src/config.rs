//! Immutable per-process session configuration.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use tracing::info;

use common::{
    validate_polling, Address, CeremonyError, ClientSettings, ObjectId, PollStrategy, Result,
};
use ledger::transaction::ProgrammableTransaction;
use ledger::{
    address_from_key, GasData, SharedLedger, SignedTransaction, TransactionData,
    TransactionExpiration, TypeTag,
};

use crate::resolver::Resolver;

/// Move module holding the secp256k1 dWallet entry points and events.
pub const DWALLET_MODULE: &str = "dwallet_2pc_mpc_secp256k1";

/// Package and object ids of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageConfig {
    /// Publishes the `ika` coin.
    pub ika_package_id: ObjectId,
    /// Publishes [`DWALLET_MODULE`].
    pub ika_system_package_id: ObjectId,
    pub system_object_id: ObjectId,
}

impl PackageConfig {
    /// Fee coin type.
    pub fn coin_type(&self) -> TypeTag {
        TypeTag::struct_tag(self.ika_package_id, "ika", "IKA")
    }
}

/// Everything a ceremony needs, built once and shared read-only.
pub struct SessionConfig {
    pub ledger: SharedLedger,
    signer: Arc<SigningKey>,
    pub sender: Address,
    pub packages: PackageConfig,
    pub protocol_state_id: Option<ObjectId>,
    pub network_decryption_key_id: Option<ObjectId>,
    pub network_version: u64,
    /// Budget for one completion wait.
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub page_limit: usize,
    pub poll_strategy: PollStrategy,
    pub gas_budget: u64,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("sender", &self.sender)
            .field("packages", &self.packages)
            .field("protocol_state_id", &self.protocol_state_id)
            .field("network_decryption_key_id", &self.network_decryption_key_id)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("poll_strategy", &self.poll_strategy)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    pub fn new(settings: &ClientSettings, ledger: SharedLedger, signer: SigningKey) -> Result<Self> {
        settings.validate()?;

        let packages = PackageConfig {
            ika_package_id: settings.require(settings.ika_package_id, "ika_package_id")?,
            ika_system_package_id: settings
                .require(settings.ika_system_package_id, "ika_system_package_id")?,
            system_object_id: settings.require(settings.system_object_id, "system_object_id")?,
        };

        Ok(Self {
            ledger,
            sender: address_from_key(&signer.verifying_key()),
            signer: Arc::new(signer),
            packages,
            protocol_state_id: settings.protocol_state_object_id,
            network_decryption_key_id: settings.network_decryption_key_id,
            network_version: settings.network_version,
            timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
            page_limit: settings.page_limit,
            poll_strategy: settings.poll_strategy,
            gas_budget: settings.gas_budget,
        })
    }

    /// Fill in protocol-state and network-key ids that were not configured
    /// by reading them from the system object, then freeze the config.
    pub async fn connect(mut self) -> Result<Arc<Self>> {
        let resolver = Resolver::new(self.ledger.clone());

        if self.protocol_state_id.is_none() {
            let id = resolver
                .protocol_state_id(&self.packages.system_object_id, self.network_version)
                .await?;
            info!(protocol_state_id = %id, "Discovered protocol state object");
            self.protocol_state_id = Some(id);
        }

        if self.network_decryption_key_id.is_none() {
            let id = resolver
                .network_decryption_key_id(&self.packages.system_object_id, self.network_version)
                .await?;
            info!(network_decryption_key_id = %id, "Discovered network decryption key");
            self.network_decryption_key_id = Some(id);
        }

        Ok(Arc::new(self))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        validate_polling(timeout, self.poll_interval)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self> {
        validate_polling(self.timeout, interval)?;
        self.poll_interval = interval;
        Ok(self)
    }

    pub fn with_poll_strategy(mut self, strategy: PollStrategy) -> Self {
        self.poll_strategy = strategy;
        self
    }

    pub fn protocol_state_id(&self) -> Result<ObjectId> {
        self.protocol_state_id.ok_or_else(|| {
            CeremonyError::Configuration("protocol state object id is not resolved".into())
        })
    }

    pub fn network_decryption_key_id(&self) -> Result<ObjectId> {
        self.network_decryption_key_id.ok_or_else(|| {
            CeremonyError::Configuration("network decryption key id is not resolved".into())
        })
    }

    /// Raw ed25519 public key of the signer.
    pub fn signer_public_key(&self) -> [u8; 32] {
        self.signer.verifying_key().to_bytes()
    }

    /// Fully-qualified type of an event in [`DWALLET_MODULE`].
    pub fn event_type(&self, event_name: &str) -> String {
        format!(
            "{}::{}::{}",
            self.packages.ika_system_package_id, DWALLET_MODULE, event_name
        )
    }

    /// Wrap `kind` for the configured sender, paid by `gas_data`, and sign it.
    pub fn sign(&self, kind: ProgrammableTransaction, gas_data: GasData) -> Result<SignedTransaction> {
        let data = TransactionData {
            kind,
            sender: self.sender,
            gas_data,
            expiration: TransactionExpiration::None,
        };
        Ok(data.sign(&self.signer)?)
    }
}

/// Parse a hex-encoded 32-byte ed25519 seed.
pub fn signing_key_from_hex(hex_seed: &str) -> Result<SigningKey> {
    let trimmed = hex_seed.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits)
        .map_err(|e| CeremonyError::Configuration(format!("Invalid signing key hex: {}", e)))?;
    let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
        CeremonyError::Configuration(format!("Signing key must be 32 bytes, got {}", b.len()))
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Read a signing key seed from a keystore file.
pub fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CeremonyError::Configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;
    signing_key_from_hex(&contents)
}
