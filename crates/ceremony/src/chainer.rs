//! Round sequencing: DKG, presign, sign and future sign.
//!
//! Each ceremony is strictly sequential: a round is initiated, its
//! completion awaited, and its typed output fed into the next round. Every
//! round tracked here moves through the [`SessionRegistry`] state machine
//! and gets the full timeout budget of the session config. Nothing is
//! retried; errors reach the caller unchanged.
//!
//! Imported-key dWallets are the exception: their transactions open no
//! session, so they are followed through their first events and the
//! dWallet's `Active` state instead of the registry.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use common::{
    CeremonyError, CeremonyMetrics, CompletionEvent, CompletionKind, DkgOutput, EventType, Hash,
    ImportedDWalletOutput, ImportedKeyVerificationEvent, LedgerEvent, LogEvent,
    NewImportedKeyEvent, ObjectId, PartialSignaturesOutput, PresignOutput, Result, SessionId,
    SignOutput,
};
use ledger::ExecutionResult;

use crate::computation::{CentralizedParty, SignInputs};
use crate::config::SessionConfig;
use crate::correlator::EventCorrelator;
use crate::initiator::{RoundArgs, SessionInitiator};
use crate::registry::{spawn_cleanup_task, SessionRegistry, SharedRegistry};
use crate::resolver::Resolver;

/// Inputs to an immediate sign.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub dwallet_cap_id: ObjectId,
    pub presign_id: ObjectId,
    pub message: Vec<u8>,
    pub hash: Hash,
    pub secret_share: Vec<u8>,
    pub decentralized_public_output: Vec<u8>,
}

/// Inputs to a future sign: the user signs now, the network completes the
/// signature once the message is approved later.
#[derive(Debug, Clone)]
pub struct FutureSignRequest {
    pub dwallet_id: ObjectId,
    pub presign_id: ObjectId,
    pub message: Vec<u8>,
    pub hash: Hash,
    pub secret_share: Vec<u8>,
    pub decentralized_public_output: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CompleteFutureSignRequest {
    pub dwallet_cap_id: ObjectId,
    pub partial_signatures_id: ObjectId,
    pub message: Vec<u8>,
    pub hash: Hash,
}

pub struct RoundChainer {
    config: Arc<SessionConfig>,
    registry: SharedRegistry,
    initiator: SessionInitiator,
    correlator: EventCorrelator,
    resolver: Resolver,
    party: Option<Arc<dyn CentralizedParty>>,
    metrics: Arc<CeremonyMetrics>,
    cleanup: Option<JoinHandle<()>>,
}

impl RoundChainer {
    pub fn new(config: Arc<SessionConfig>, registry: SharedRegistry) -> Self {
        let metrics = Arc::new(CeremonyMetrics::new());
        Self {
            initiator: SessionInitiator::new(config.clone()),
            correlator: EventCorrelator::new(config.clone(), metrics.clone()),
            resolver: Resolver::new(config.ledger.clone()),
            config,
            registry,
            party: None,
            metrics,
            cleanup: None,
        }
    }

    /// Run registry cleanup in the background for as long as this chainer
    /// lives.
    pub fn with_cleanup(mut self) -> Self {
        if self.cleanup.is_none() {
            self.cleanup = Some(spawn_cleanup_task(self.registry.clone()));
        }
        self
    }

    /// Attach the native computation module. Needed by DKG and signing.
    pub fn with_party(mut self, party: Arc<dyn CentralizedParty>) -> Self {
        self.party = Some(party);
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &CeremonyMetrics {
        &self.metrics
    }

    fn party(&self) -> Result<&Arc<dyn CentralizedParty>> {
        self.party.as_ref().ok_or_else(|| {
            CeremonyError::Configuration("no centralized party module configured".into())
        })
    }

    /// Initiate one round and wait for its completion event, recording
    /// every state change in the registry.
    pub async fn run_round(
        &self,
        args: &RoundArgs,
        kind: CompletionKind,
    ) -> Result<CompletionEvent> {
        let round = args.round();
        let handle = match self.initiator.initiate(args).await {
            Ok(handle) => handle,
            Err(e) => {
                self.metrics.inc_sessions_failed();
                LogEvent::new(EventType::SessionFailed)
                    .with_round(round)
                    .with_error(e.to_string())
                    .emit();
                return Err(e);
            }
        };
        let session_id = handle.session_id.clone();
        self.metrics.inc_sessions_started();

        {
            let mut registry = self.registry.write().await;
            registry.register(handle.clone())?;
            registry.mark_awaiting(&session_id)?;
        }

        let outcome = self.correlator.await_completion(&handle, kind).await;
        let mut registry = self.registry.write().await;
        match outcome {
            Ok(event) => {
                registry.complete(&session_id, event.clone())?;
                self.metrics.inc_sessions_completed();
                LogEvent::new(EventType::SessionCompleted)
                    .with_correlation_id(session_id.to_string())
                    .with_round(round)
                    .emit();
                Ok(event)
            }
            Err(e) => {
                let recorded = if matches!(e, CeremonyError::SessionTimeout { .. }) {
                    self.metrics.inc_sessions_timed_out();
                    LogEvent::new(EventType::SessionTimeout)
                        .with_correlation_id(session_id.to_string())
                        .with_round(round)
                        .with_error(e.to_string())
                        .emit();
                    registry.time_out(&session_id)
                } else {
                    self.metrics.inc_sessions_failed();
                    LogEvent::new(EventType::SessionFailed)
                        .with_correlation_id(session_id.to_string())
                        .with_round(round)
                        .with_error(e.to_string())
                        .emit();
                    registry.fail(&session_id, e.to_string())
                };
                if let Err(reg) = recorded {
                    warn!(session_id = %session_id, error = %reg, "Failed to record session outcome");
                }
                Err(e)
            }
        }
    }

    /// Two-phase DKG ending with an `Active` dWallet.
    pub async fn run_dkg(&self) -> Result<DkgOutput> {
        let party = self.party()?;

        let first = self
            .run_round(&RoundArgs::DkgFirstRound, CompletionKind::DkgFirstRound)
            .await?
            .into_dkg_first_round()?;
        info!(dwallet_id = %first.dwallet_id, "DKG first round completed");

        let network_output = self
            .resolver
            .network_public_output(&self.config.network_decryption_key_id()?)
            .await?;
        let centralized = party.dkg_centralized_step(
            &network_output,
            &first.first_round_output,
            &first.session_id,
        )?;

        let second = self
            .run_round(
                &RoundArgs::DkgSecondRound {
                    dwallet_cap_id: first.dwallet_cap_id,
                    first_round_session_id: session_object_id(&first.session_id)?,
                    public_key_share_and_proof: centralized.public_key_share_and_proof,
                    centralized_public_output: centralized.centralized_public_output.clone(),
                },
                CompletionKind::DkgSecondRound,
            )
            .await?
            .into_dkg_second_round()?;

        let public_output = self
            .resolver
            .wait_for_active_dwallet(
                &second.dwallet_id,
                self.config.poll_interval,
                self.config.timeout,
            )
            .await?;
        info!(dwallet_id = %second.dwallet_id, "DKG completed");

        Ok(DkgOutput {
            dwallet_id: second.dwallet_id,
            dwallet_cap_id: second.dwallet_cap_id,
            centralized_public_output: centralized.centralized_public_output,
            decentralized_public_output: public_output,
            secret_share: centralized.secret_share,
        })
    }

    /// Create a dWallet from an existing `secret_key` and wait until the
    /// network has verified it.
    pub async fn run_imported_dkg(&self, secret_key: &[u8]) -> Result<ImportedDWalletOutput> {
        let party = self.party()?;

        let created = self.initiator.execute(&RoundArgs::ImportedKey).await?;
        let created = first_event(&created, NewImportedKeyEvent::from_event, "dwallet_id")?;
        info!(dwallet_id = %created.dwallet_id, "Imported-key dWallet created");

        let network_output = self
            .resolver
            .network_public_output(&self.config.network_decryption_key_id()?)
            .await?;
        let imported = party.imported_key_centralized_step(
            &network_output,
            &created.dwallet_id,
            secret_key,
        )?;

        let verification = self
            .initiator
            .execute(&RoundArgs::ImportedKeyVerification {
                dwallet_cap_id: created.dwallet_cap_id,
                centralized_party_message: imported.centralized_party_message,
                encrypted_secret_share_and_proof: imported.encrypted_secret_share_and_proof,
                user_public_output: imported.public_output,
                signer_public_key: self.config.signer_public_key().to_vec(),
            })
            .await?;
        let verification = first_event(
            &verification,
            ImportedKeyVerificationEvent::from_event,
            "event_data.encrypted_user_secret_key_share_id",
        )?;

        let public_output = self
            .resolver
            .wait_for_active_dwallet(
                &created.dwallet_id,
                self.config.poll_interval,
                self.config.timeout,
            )
            .await?;
        info!(dwallet_id = %created.dwallet_id, "Imported-key dWallet verified");

        Ok(ImportedDWalletOutput {
            dwallet_id: created.dwallet_id,
            dwallet_cap_id: created.dwallet_cap_id,
            encrypted_secret_share_id: verification.encrypted_user_secret_key_share_id,
            secret_share: imported.secret_share,
            public_output,
        })
    }

    pub async fn run_presign(&self, dwallet_id: ObjectId) -> Result<PresignOutput> {
        self.run_round(&RoundArgs::Presign { dwallet_id }, CompletionKind::Presign)
            .await?
            .into_presign()
    }

    /// Approve `request.message` and sign it with a presign completed by
    /// this chainer. A presign is used by at most one successful sign.
    pub async fn run_sign(&self, request: &SignRequest) -> Result<SignOutput> {
        let presign = self.completed_presign(&request.presign_id).await?;
        let signature = self
            .centralized_signature(
                &presign,
                &request.decentralized_public_output,
                &request.secret_share,
                &request.message,
                request.hash,
            )
            .await?;

        let output = self
            .run_round(
                &RoundArgs::Sign {
                    dwallet_cap_id: request.dwallet_cap_id,
                    presign_id: request.presign_id,
                    message: request.message.clone(),
                    hash: request.hash,
                    message_centralized_signature: signature,
                },
                CompletionKind::Sign,
            )
            .await?
            .into_sign()?;
        self.mark_presign_used(&request.presign_id).await;
        Ok(output)
    }

    /// Publish the user's partial signature for a message approved later
    /// with [`complete_future_sign`](Self::complete_future_sign).
    pub async fn run_future_sign(
        &self,
        request: &FutureSignRequest,
    ) -> Result<PartialSignaturesOutput> {
        let presign = self.completed_presign(&request.presign_id).await?;
        let signature = self
            .centralized_signature(
                &presign,
                &request.decentralized_public_output,
                &request.secret_share,
                &request.message,
                request.hash,
            )
            .await?;

        let output = self
            .run_round(
                &RoundArgs::FutureSign {
                    dwallet_id: request.dwallet_id,
                    presign_id: request.presign_id,
                    message: request.message.clone(),
                    hash: request.hash,
                    message_centralized_signature: signature,
                },
                CompletionKind::PartialSignatures,
            )
            .await?
            .into_partial_signatures()?;
        self.mark_presign_used(&request.presign_id).await;
        Ok(output)
    }

    pub async fn complete_future_sign(
        &self,
        request: &CompleteFutureSignRequest,
    ) -> Result<SignOutput> {
        self.run_round(
            &RoundArgs::CompleteFutureSign {
                dwallet_cap_id: request.dwallet_cap_id,
                partial_signatures_id: request.partial_signatures_id,
                message: request.message.clone(),
                hash: request.hash,
            },
            CompletionKind::Sign,
        )
        .await?
        .into_sign()
    }

    async fn completed_presign(&self, presign_id: &ObjectId) -> Result<PresignOutput> {
        let registry = self.registry.read().await;
        lookup_presign(&registry, presign_id)
    }

    async fn mark_presign_used(&self, presign_id: &ObjectId) {
        if !self.registry.write().await.mark_presign_used(presign_id) {
            warn!(presign_id = %presign_id, "Used presign is no longer registered");
        }
    }

    async fn centralized_signature(
        &self,
        presign: &PresignOutput,
        decentralized_public_output: &[u8],
        secret_share: &[u8],
        message: &[u8],
        hash: Hash,
    ) -> Result<Vec<u8>> {
        let party = self.party()?;
        let network_output = self
            .resolver
            .network_public_output(&self.config.network_decryption_key_id()?)
            .await?;
        party.sign_centralized_step(SignInputs {
            network_public_output: &network_output,
            decentralized_public_output,
            secret_share,
            presign: &presign.presign,
            message,
            hash,
        })
    }
}

impl Drop for RoundChainer {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
    }
}

/// Decode the first event of an executed transaction with `parse`.
fn first_event<T>(
    result: &ExecutionResult,
    parse: fn(&LedgerEvent) -> Option<T>,
    field: &str,
) -> Result<T> {
    let first = result.events.first().ok_or_else(|| {
        CeremonyError::InvalidStartSessionEvent(format!(
            "transaction {} emitted no events",
            result.digest
        ))
    })?;
    parse(first).ok_or_else(|| {
        CeremonyError::InvalidStartSessionEvent(format!(
            "first event {} of transaction {} carries no {}",
            first.event_type, result.digest, field
        ))
    })
}

fn lookup_presign(registry: &SessionRegistry, presign_id: &ObjectId) -> Result<PresignOutput> {
    registry.completed_presign(presign_id).cloned().ok_or_else(|| {
        CeremonyError::Precondition(format!(
            "presign {} has no completed presign session",
            presign_id
        ))
    })
}

/// The first DKG round's session id, passed back to the second round as
/// an object id.
fn session_object_id(session_id: &SessionId) -> Result<ObjectId> {
    session_id
        .as_str()
        .parse()
        .map_err(|e| CeremonyError::MalformedCompletionEvent {
            event_type: CompletionKind::DkgFirstRound.event_name().to_string(),
            reason: format!("session_id {} is not an object id: {}", session_id, e),
        })
}
