//! Builds and submits session-starting transactions.

use std::sync::Arc;

use tracing::{debug, info, warn};

use common::{
    CeremonyError, EventType, Hash, LogEvent, ObjectId, Result, RoundKind, SessionHandle,
    StartSessionEvent,
};
use ledger::{Argument, ExecutionResult, ExecutionStatus, TransactionBuilder};

use crate::config::{SessionConfig, DWALLET_MODULE};
use crate::resolver::Resolver;

/// Curve id passed to `new_imported_key_dwallet`.
pub const SECP256K1_CURVE: u32 = 0;

/// Arguments of one round-starting call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundArgs {
    DkgFirstRound,
    DkgSecondRound {
        dwallet_cap_id: ObjectId,
        first_round_session_id: ObjectId,
        public_key_share_and_proof: Vec<u8>,
        centralized_public_output: Vec<u8>,
    },
    Presign {
        dwallet_id: ObjectId,
    },
    Sign {
        dwallet_cap_id: ObjectId,
        presign_id: ObjectId,
        message: Vec<u8>,
        hash: Hash,
        message_centralized_signature: Vec<u8>,
    },
    FutureSign {
        dwallet_id: ObjectId,
        presign_id: ObjectId,
        message: Vec<u8>,
        hash: Hash,
        message_centralized_signature: Vec<u8>,
    },
    CompleteFutureSign {
        dwallet_cap_id: ObjectId,
        partial_signatures_id: ObjectId,
        message: Vec<u8>,
        hash: Hash,
    },
    /// Create the dWallet an existing key is imported into.
    ImportedKey,
    /// Hand the network its share of an imported key. The encryption key
    /// is registered under the sender's address.
    ImportedKeyVerification {
        dwallet_cap_id: ObjectId,
        centralized_party_message: Vec<u8>,
        encrypted_secret_share_and_proof: Vec<u8>,
        user_public_output: Vec<u8>,
        signer_public_key: Vec<u8>,
    },
}

impl RoundArgs {
    pub fn round(&self) -> RoundKind {
        match self {
            RoundArgs::DkgFirstRound => RoundKind::DkgFirstRound,
            RoundArgs::DkgSecondRound { .. } => RoundKind::DkgSecondRound,
            RoundArgs::Presign { .. } => RoundKind::Presign,
            RoundArgs::Sign { .. } => RoundKind::Sign,
            RoundArgs::FutureSign { .. } => RoundKind::FutureSign,
            RoundArgs::CompleteFutureSign { .. } => RoundKind::CompleteFutureSign,
            RoundArgs::ImportedKey => RoundKind::ImportedKey,
            RoundArgs::ImportedKeyVerification { .. } => RoundKind::ImportedKeyVerification,
        }
    }

    /// Whether the round call takes a zero fee coin and the gas coin.
    pub fn pays_fee(&self) -> bool {
        !matches!(self, RoundArgs::ImportedKey)
    }
}

pub struct SessionInitiator {
    config: Arc<SessionConfig>,
    resolver: Resolver,
}

impl SessionInitiator {
    pub fn new(config: Arc<SessionConfig>) -> Self {
        let resolver = Resolver::new(config.ledger.clone());
        Self { config, resolver }
    }

    /// Submit the transaction that starts `args`' round and return a handle
    /// for the session it opened.
    pub async fn initiate(&self, args: &RoundArgs) -> Result<SessionHandle> {
        let round = args.round();
        let result = self.execute(args).await?;

        let first = result.events.first().ok_or_else(|| {
            CeremonyError::InvalidStartSessionEvent(format!(
                "transaction {} emitted no events",
                result.digest
            ))
        })?;
        let start = StartSessionEvent::from_event(first).ok_or_else(|| {
            CeremonyError::InvalidStartSessionEvent(format!(
                "first event {} of transaction {} carries no session_id",
                first.event_type, result.digest
            ))
        })?;

        info!(%round, session_id = %start.session_id, digest = %result.digest, "Session started");
        LogEvent::new(EventType::SessionStarted)
            .with_correlation_id(start.session_id.to_string())
            .with_round(round)
            .with_context("digest", result.digest.clone())
            .emit();

        Ok(SessionHandle::new(start.session_id, round, result.digest.clone())
            .with_start_event(first.id.clone()))
    }

    /// Build, sign and submit the transaction for `args`. A transaction
    /// that executes with a failure status is `RoundExecutionFailed`.
    pub async fn execute(&self, args: &RoundArgs) -> Result<ExecutionResult> {
        let round = args.round();
        LogEvent::new(EventType::SessionInitiated)
            .with_round(round)
            .emit();

        let state = self
            .resolver
            .resolve(&self.config.protocol_state_id()?, true)
            .await?;

        let mut tx = TransactionBuilder::new();
        let coin_type = self.config.packages.coin_type();
        let fee = args.pays_fee().then(|| tx.zero_coin(&coin_type));
        let state_arg = tx.shared_object(&state);
        self.add_round_calls(&mut tx, state_arg, fee, args).await?;
        if let Some(fee) = fee {
            tx.destroy_zero(fee, &coin_type);
        }

        let gas = self
            .resolver
            .gas_data(&self.config.sender, self.config.gas_budget)
            .await?;
        let signed = self.config.sign(tx.finish()?, gas)?;

        LogEvent::new(EventType::TransactionSubmitted)
            .with_round(round)
            .with_context("sender", self.config.sender.to_string())
            .emit();
        let result = self.config.ledger.submit_and_execute(&signed).await?;

        if let ExecutionStatus::Failure { error } = &result.status {
            warn!(%round, digest = %result.digest, %error, "Round transaction failed");
            LogEvent::new(EventType::TransactionFailed)
                .with_round(round)
                .with_context("digest", result.digest.clone())
                .with_error(error.clone())
                .emit();
            return Err(CeremonyError::RoundExecutionFailed {
                round,
                digest: result.digest,
                error: error.clone(),
            });
        }
        Ok(result)
    }

    async fn add_round_calls(
        &self,
        tx: &mut TransactionBuilder,
        state: Argument,
        fee: Option<Argument>,
        args: &RoundArgs,
    ) -> Result<()> {
        let package = self.config.packages.ika_system_package_id;
        let call = |tx: &mut TransactionBuilder, function: &str, mut arguments: Vec<Argument>| {
            if let Some(fee) = fee {
                arguments.extend([fee, Argument::GasCoin]);
            }
            debug!(function, "Adding round call");
            tx.move_call(package, DWALLET_MODULE, function, vec![], arguments)
        };

        match args {
            RoundArgs::DkgFirstRound => {
                let key = tx.pure_id(&self.config.network_decryption_key_id()?);
                let cap = call(tx, "request_dkg_first_round", vec![state, key]);
                let sender = tx.pure_id(&self.config.sender);
                tx.transfer_objects(vec![cap], sender);
            }
            RoundArgs::DkgSecondRound {
                dwallet_cap_id,
                first_round_session_id,
                public_key_share_and_proof,
                centralized_public_output,
            } => {
                let cap = self.owned_object(tx, dwallet_cap_id).await?;
                let proof = tx.pure_bytes(public_key_share_and_proof);
                let output = tx.pure_bytes(centralized_public_output);
                let first_session = tx.pure_id(first_round_session_id);
                call(
                    tx,
                    "request_dkg_second_round",
                    vec![state, cap, proof, output, first_session],
                );
            }
            RoundArgs::Presign { dwallet_id } => {
                let dwallet = tx.pure_id(dwallet_id);
                let presign_cap = call(tx, "request_ecdsa_presign", vec![state, dwallet]);
                let sender = tx.pure_id(&self.config.sender);
                tx.transfer_objects(vec![presign_cap], sender);
            }
            RoundArgs::Sign {
                dwallet_cap_id,
                presign_id,
                message,
                hash,
                message_centralized_signature,
            } => {
                let approval = self
                    .approve_message(tx, state, dwallet_cap_id, *hash, message)
                    .await?;
                let presign = tx.pure_id(presign_id);
                let signature = tx.pure_bytes(message_centralized_signature);
                call(
                    tx,
                    "request_ecdsa_sign",
                    vec![state, presign, approval, signature],
                );
            }
            RoundArgs::FutureSign {
                dwallet_id,
                presign_id,
                message,
                hash,
                message_centralized_signature,
            } => {
                let dwallet = tx.pure_id(dwallet_id);
                let presign = tx.pure_id(presign_id);
                let messages = tx.pure_byte_vectors(std::slice::from_ref(message));
                let hash = tx.pure_u8(hash.as_u8());
                let signature = tx.pure_bytes(message_centralized_signature);
                call(
                    tx,
                    "request_future_sign",
                    vec![state, dwallet, presign, messages, hash, signature],
                );
            }
            RoundArgs::CompleteFutureSign {
                dwallet_cap_id,
                partial_signatures_id,
                message,
                hash,
            } => {
                let approval = self
                    .approve_message(tx, state, dwallet_cap_id, *hash, message)
                    .await?;
                let partial = self.owned_object(tx, partial_signatures_id).await?;
                call(
                    tx,
                    "sign_with_partial_centralized_message_signatures",
                    vec![state, partial, approval],
                );
            }
            RoundArgs::ImportedKey => {
                let key = tx.pure_id(&self.config.network_decryption_key_id()?);
                let curve = tx.pure_u32(SECP256K1_CURVE);
                let cap = call(tx, "new_imported_key_dwallet", vec![state, key, curve]);
                let sender = tx.pure_id(&self.config.sender);
                tx.transfer_objects(vec![cap], sender);
            }
            RoundArgs::ImportedKeyVerification {
                dwallet_cap_id,
                centralized_party_message,
                encrypted_secret_share_and_proof,
                user_public_output,
                signer_public_key,
            } => {
                let cap = self.owned_object(tx, dwallet_cap_id).await?;
                let message = tx.pure_bytes(centralized_party_message);
                let share = tx.pure_bytes(encrypted_secret_share_and_proof);
                let encryption_key = tx.pure_id(&self.config.sender);
                let output = tx.pure_bytes(user_public_output);
                let signer = tx.pure_bytes(signer_public_key);
                call(
                    tx,
                    "request_imported_key_dwallet_verification",
                    vec![state, cap, message, share, encryption_key, output, signer],
                );
            }
        }
        Ok(())
    }

    /// An owned object input at the version the ledger currently holds.
    async fn owned_object(
        &self,
        tx: &mut TransactionBuilder,
        object_id: &ObjectId,
    ) -> Result<Argument> {
        let object = self.resolver.object_ref(object_id).await?;
        Ok(tx.owned_object(&object))
    }

    /// `approve_messages(state, cap, hash, messages)`; its result authorizes
    /// the sign call that follows in the same transaction.
    async fn approve_message(
        &self,
        tx: &mut TransactionBuilder,
        state: Argument,
        dwallet_cap_id: &ObjectId,
        hash: Hash,
        message: &[u8],
    ) -> Result<Argument> {
        let cap = self.owned_object(tx, dwallet_cap_id).await?;
        let hash = tx.pure_u8(hash.as_u8());
        let messages = tx.pure_byte_vectors(&[message.to_vec()]);
        Ok(tx.move_call(
            self.config.packages.ika_system_package_id,
            DWALLET_MODULE,
            "approve_messages",
            vec![],
            vec![state, cap, hash, messages],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ClientSettings;
    use ed25519_dalek::SigningKey;
    use ledger::memory::REFERENCE_GAS_PRICE;
    use ledger::transaction::{CallArg, Command, ObjectArg};
    use ledger::{InMemoryLedger, ObjectDigest, ObjectRef};
    use serde_json::json;

    async fn setup() -> (Arc<InMemoryLedger>, SessionInitiator) {
        let ledger = Arc::new(InMemoryLedger::new());
        let state = ObjectId::from_u8(0x20);
        ledger.insert_shared_object(state, 4, json!({})).await;

        let settings = ClientSettings {
            ika_package_id: Some(ObjectId::from_u8(1)),
            ika_system_package_id: Some(ObjectId::from_u8(3)),
            system_object_id: Some(ObjectId::from_u8(5)),
            protocol_state_object_id: Some(state),
            network_decryption_key_id: Some(ObjectId::from_u8(0x30)),
            ..Default::default()
        };
        let config =
            SessionConfig::new(&settings, ledger.clone(), SigningKey::from_bytes(&[2; 32]))
                .unwrap()
                .connect()
                .await
                .unwrap();
        (ledger, SessionInitiator::new(config))
    }

    #[tokio::test]
    async fn test_presign_transaction_shape() {
        let (ledger, initiator) = setup().await;
        ledger.push_session_id(common::SessionId::new("S1")).await;

        let handle = initiator
            .initiate(&RoundArgs::Presign {
                dwallet_id: ObjectId::from_u8(9),
            })
            .await
            .unwrap();
        assert_eq!(handle.session_id.as_str(), "S1");
        assert_eq!(handle.round, RoundKind::Presign);
        assert!(handle.start_event.is_some());

        let txs = ledger.submitted_transactions().await;
        let ptb = &txs[0].kind;
        let functions: Vec<&str> = ptb.move_calls().map(|c| c.function.as_str()).collect();
        assert_eq!(
            functions,
            vec!["zero", "request_ecdsa_presign", "destroy_zero"]
        );
        assert!(ptb.commands.iter().any(|c| matches!(c, Command::TransferObjects(..))));
        assert!(ptb.inputs.iter().any(|i| matches!(
            i,
            CallArg::Object(ObjectArg::Shared {
                initial_shared_version: 4,
                mutable: true,
                ..
            })
        )));
    }

    #[tokio::test]
    async fn test_gas_payment_from_sender_coins() {
        let (ledger, initiator) = setup().await;
        initiator
            .initiate(&RoundArgs::Presign {
                dwallet_id: ObjectId::from_u8(9),
            })
            .await
            .unwrap();

        let txs = ledger.submitted_transactions().await;
        let gas = &txs[0].gas_data;
        assert_eq!(gas.owner, txs[0].sender);
        assert_eq!(gas.price, REFERENCE_GAS_PRICE);
        assert_eq!(gas.budget, ClientSettings::default().gas_budget);
        assert_eq!(gas.payment.len(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_gas_is_not_submitted() {
        let (ledger, initiator) = setup().await;
        ledger.set_gas_balance(1).await;

        let err = initiator
            .initiate(&RoundArgs::Presign {
                dwallet_id: ObjectId::from_u8(9),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::Precondition(_)));
        assert!(ledger.submitted_transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_cap_is_not_submitted() {
        let (ledger, initiator) = setup().await;
        let err = initiator
            .initiate(&RoundArgs::DkgSecondRound {
                dwallet_cap_id: ObjectId::from_u8(7),
                first_round_session_id: ObjectId::from_u8(8),
                public_key_share_and_proof: vec![1],
                centralized_public_output: vec![2],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ObjectNotFound(_)));
        assert!(ledger.submitted_transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_imported_key_transactions() {
        let (ledger, initiator) = setup().await;
        let cap = ObjectId::from_u8(7);
        ledger.insert_owned_object(cap, ObjectId::from_u8(1)).await;

        initiator.execute(&RoundArgs::ImportedKey).await.unwrap();
        initiator
            .execute(&RoundArgs::ImportedKeyVerification {
                dwallet_cap_id: cap,
                centralized_party_message: vec![1],
                encrypted_secret_share_and_proof: vec![2],
                user_public_output: vec![3],
                signer_public_key: vec![4; 32],
            })
            .await
            .unwrap();

        let txs = ledger.submitted_transactions().await;
        let functions: Vec<&str> = txs[0].kind.move_calls().map(|c| c.function.as_str()).collect();
        assert_eq!(functions, vec!["new_imported_key_dwallet"]);
        assert!(txs[0]
            .kind
            .inputs
            .contains(&CallArg::Pure(SECP256K1_CURVE.to_le_bytes().to_vec())));

        let functions: Vec<&str> = txs[1].kind.move_calls().map(|c| c.function.as_str()).collect();
        assert_eq!(
            functions,
            vec!["zero", "request_imported_key_dwallet_verification", "destroy_zero"]
        );
        let verify = txs[1].kind.move_calls().nth(1).unwrap();
        assert_eq!(verify.arguments.len(), 9);
        assert_eq!(verify.arguments[8], Argument::GasCoin);
        assert!(txs[1]
            .kind
            .inputs
            .contains(&CallArg::Pure(txs[1].sender.as_bytes().to_vec())));
    }

    #[tokio::test]
    async fn test_sign_approves_in_same_transaction() {
        let (ledger, initiator) = setup().await;
        ledger
            .insert_owned_object(ObjectId::from_u8(7), ObjectId::from_u8(1))
            .await;
        initiator
            .initiate(&RoundArgs::Sign {
                dwallet_cap_id: ObjectId::from_u8(7),
                presign_id: ObjectId::from_u8(8),
                message: b"hello".to_vec(),
                hash: Hash::Sha256,
                message_centralized_signature: vec![1, 2, 3],
            })
            .await
            .unwrap();

        let txs = ledger.submitted_transactions().await;
        let functions: Vec<&str> = txs[0]
            .kind
            .move_calls()
            .map(|c| c.function.as_str())
            .collect();
        assert_eq!(
            functions,
            vec!["zero", "approve_messages", "request_ecdsa_sign", "destroy_zero"]
        );
        assert!(txs[0]
            .kind
            .inputs
            .contains(&CallArg::Pure(vec![Hash::Sha256.as_u8()])));
        assert!(txs[0]
            .kind
            .inputs
            .contains(&CallArg::Object(ObjectArg::ImmOrOwned(ObjectRef {
                object_id: ObjectId::from_u8(7),
                version: 1,
                digest: ObjectDigest::new(*ObjectId::from_u8(7).as_bytes()),
            }))));
    }

    #[tokio::test]
    async fn test_execution_failure_not_retried() {
        let (ledger, initiator) = setup().await;
        ledger.fail_next_submission("MoveAbort(3)").await;

        let err = initiator
            .initiate(&RoundArgs::Presign {
                dwallet_id: ObjectId::from_u8(9),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::RoundExecutionFailed { round: RoundKind::Presign, .. }));
        assert_eq!(ledger.submitted_transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_start_event() {
        let (ledger, initiator) = setup().await;
        ledger.skip_next_start_event().await;

        let err = initiator
            .initiate(&RoundArgs::DkgFirstRound)
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::InvalidStartSessionEvent(_)));
    }
}
