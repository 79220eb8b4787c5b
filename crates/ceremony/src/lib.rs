//! Orchestration of asynchronous MPC ceremonies over a ledger.
//!
//! - [`config`]: immutable [`SessionConfig`] shared by every component
//! - [`resolver`]: shared-object and system-state lookups
//! - [`initiator`]: builds and submits round-starting transactions
//! - [`correlator`]: polls the event log for completion events
//! - [`registry`]: per-session round state
//! - [`chainer`]: DKG, imported-key, presign and sign sequencing
//! - [`computation`]: seam to the native centralized-party module

pub mod chainer;
pub mod computation;
pub mod config;
pub mod correlator;
pub mod initiator;
pub mod registry;
pub mod resolver;

pub use chainer::{CompleteFutureSignRequest, FutureSignRequest, RoundChainer, SignRequest};
pub use computation::{CentralizedDkgOutput, CentralizedParty, ImportedKeyOutput, SignInputs};
pub use config::{load_signing_key, signing_key_from_hex, PackageConfig, SessionConfig, DWALLET_MODULE};
pub use correlator::{match_event, EventCorrelator};
pub use initiator::{RoundArgs, SessionInitiator, SECP256K1_CURVE};
pub use registry::{
    spawn_cleanup_task, RegistryError, RegistryStats, RoundState, SessionRecord, SessionRegistry,
    SharedRegistry, CLEANUP_INTERVAL_SECS, SESSION_RETENTION_SECS,
};
pub use resolver::{Resolver, MAX_GAS_COINS};
