//! CLI command implementations.
//!
//! - `objects`: shared-object resolution and deployment discovery
//! - `session`: presign and completion waits

pub mod objects;
pub mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use ceremony::{load_signing_key, SessionConfig};
use common::ClientSettings;
use ed25519_dalek::SigningKey;
use ledger::{LedgerRpcClient, RpcConfig, SharedLedger};
use rand::rngs::OsRng;
use tracing::{debug, warn};

pub use objects::*;
pub use session::*;

fn connect_ledger(settings: &ClientSettings) -> Result<SharedLedger> {
    let client = LedgerRpcClient::new(RpcConfig::new(settings.rpc_url.clone()))
        .context("Failed to create JSON-RPC client")?;
    debug!(url = %client.url(), "Connected ledger client");
    Ok(Arc::new(client))
}

/// Key for signing transactions. Read-only commands may run without a
/// keystore and get a throwaway key.
fn signing_key(settings: &ClientSettings, required: bool) -> Result<SigningKey> {
    match &settings.keystore_path {
        Some(path) => load_signing_key(path)
            .with_context(|| format!("Failed to load keystore {}", path.display())),
        None if required => {
            anyhow::bail!("A keystore is required (--keystore or DWALLET_KEYSTORE_PATH)")
        }
        None => {
            warn!("No keystore configured, using an ephemeral key");
            Ok(SigningKey::generate(&mut OsRng))
        }
    }
}

async fn session_config(
    settings: &ClientSettings,
    signer: SigningKey,
) -> Result<Arc<SessionConfig>> {
    let config = SessionConfig::new(settings, connect_ledger(settings)?, signer)
        .context("Invalid session config")?
        .connect()
        .await
        .context("Failed to discover deployment objects")?;
    Ok(config)
}
