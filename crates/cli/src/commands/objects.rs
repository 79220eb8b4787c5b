//! Object resolution commands.

use anyhow::{Context, Result};
use ceremony::Resolver;
use common::{ClientSettings, ObjectId};

use super::{session_config, signing_key};

/// Resolve one shared object, or the deployment's protocol state and
/// network decryption key when `object_id` is omitted.
pub async fn resolve(settings: &ClientSettings, object_id: Option<&str>) -> Result<()> {
    let config = session_config(settings, signing_key(settings, false)?).await?;
    let resolver = Resolver::new(config.ledger.clone());

    let target: ObjectId = match object_id {
        Some(raw) => raw.parse().context("Invalid object id")?,
        None => config.protocol_state_id()?,
    };
    let shared = resolver.resolve(&target, false).await?;

    println!("Shared Object");
    println!("=============");
    println!("  ID:              {}", shared.object_id);
    println!("  Initial version: {}", shared.initial_shared_version);

    if object_id.is_none() {
        let key_id = config.network_decryption_key_id()?;
        let output = resolver.network_public_output(&key_id).await?;
        println!();
        println!("Network Decryption Key");
        println!("======================");
        println!("  ID:              {}", key_id);
        println!("  DKG output:      {} bytes", output.len());
    }

    Ok(())
}
