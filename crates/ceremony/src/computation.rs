//! Seam to the native centralized-party computation module.
//!
//! The threshold-ECDSA math lives outside this crate. The chainer only
//! moves opaque byte blobs through this trait.

use common::{Hash, ObjectId, Result, SessionId};

/// User-side output of the centralized DKG step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralizedDkgOutput {
    /// Sent to the network with the second DKG round.
    pub public_key_share_and_proof: Vec<u8>,
    pub centralized_public_output: Vec<u8>,
    /// Kept by the user.
    pub secret_share: Vec<u8>,
}

/// User-side output of importing an existing secret key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedKeyOutput {
    /// Sent to the network for verification.
    pub centralized_party_message: Vec<u8>,
    /// The secret share encrypted to the user's encryption key, with its
    /// proof of correct encryption.
    pub encrypted_secret_share_and_proof: Vec<u8>,
    pub public_output: Vec<u8>,
    /// Kept by the user.
    pub secret_share: Vec<u8>,
}

/// Inputs to the centralized sign step.
#[derive(Debug, Clone, Copy)]
pub struct SignInputs<'a> {
    pub network_public_output: &'a [u8],
    pub decentralized_public_output: &'a [u8],
    pub secret_share: &'a [u8],
    pub presign: &'a [u8],
    pub message: &'a [u8],
    pub hash: Hash,
}

pub trait CentralizedParty: Send + Sync {
    /// Run the user's half of DKG on the network's first-round output.
    fn dkg_centralized_step(
        &self,
        network_public_output: &[u8],
        first_round_output: &[u8],
        first_round_session_id: &SessionId,
    ) -> Result<CentralizedDkgOutput>;

    /// Split `secret_key` into the user's share and the network's message
    /// for the dWallet created by `new_imported_key_dwallet`.
    fn imported_key_centralized_step(
        &self,
        network_public_output: &[u8],
        dwallet_id: &ObjectId,
        secret_key: &[u8],
    ) -> Result<ImportedKeyOutput>;

    /// Produce the user's centralized signature over `inputs.message`.
    fn sign_centralized_step(&self, inputs: SignInputs<'_>) -> Result<Vec<u8>>;
}
