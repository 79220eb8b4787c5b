//! Shared-object resolution and ledger object lookups.
//!
//! References are resolved fresh for every transaction; nothing is cached.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use common::{
    Address, CeremonyError, DWalletState, EventType, LedgerError, LogEvent, ObjectId, Result,
    SharedObjectRef,
};
use ledger::{GasData, ObjectData, ObjectOptions, ObjectRef, Owner, SharedLedger};

/// Most coins one transaction may pay with.
pub const MAX_GAS_COINS: usize = 256;

#[derive(Clone)]
pub struct Resolver {
    ledger: SharedLedger,
}

impl Resolver {
    pub fn new(ledger: SharedLedger) -> Self {
        Self { ledger }
    }

    /// Look up a shared object's initial shared version.
    pub async fn resolve(&self, object_id: &ObjectId, mutable: bool) -> Result<SharedObjectRef> {
        let object = self
            .ledger
            .get_object(object_id, ObjectOptions::owner_only())
            .await?
            .ok_or(CeremonyError::ObjectNotFound(*object_id))?;

        match object.owner {
            Some(Owner::Shared {
                initial_shared_version,
            }) => {
                debug!(object_id = %object_id, initial_shared_version, "Resolved shared object");
                LogEvent::new(EventType::ObjectResolved)
                    .with_context("object_id", object_id.to_string())
                    .emit();
                Ok(SharedObjectRef {
                    object_id: *object_id,
                    initial_shared_version,
                    mutable,
                })
            }
            _ => Err(CeremonyError::NotSharedObject(*object_id)),
        }
    }

    /// Current version and digest of an owned or immutable object.
    pub async fn object_ref(&self, object_id: &ObjectId) -> Result<ObjectRef> {
        self.ledger
            .get_object(object_id, ObjectOptions::owner_only())
            .await?
            .ok_or(CeremonyError::ObjectNotFound(*object_id))?
            .object_ref()
            .ok_or_else(|| missing_field(object_id, "digest"))
    }

    /// Pick `owner`'s gas coins, largest first, until they cover `budget`.
    pub async fn gas_data(&self, owner: &Address, budget: u64) -> Result<GasData> {
        let price = self.ledger.reference_gas_price().await?;
        let mut coins = self.ledger.gas_coins(owner).await?;
        coins.sort_by(|a, b| b.balance.cmp(&a.balance));

        let mut payment = Vec::new();
        let mut total: u64 = 0;
        for coin in coins.iter().take(MAX_GAS_COINS) {
            if total >= budget {
                break;
            }
            total = total.saturating_add(coin.balance);
            payment.push(coin.object_ref());
        }

        if payment.is_empty() || total < budget {
            return Err(CeremonyError::Precondition(format!(
                "gas coins of {} hold {} but the budget is {}",
                owner, total, budget
            )));
        }
        debug!(coins = payment.len(), price, budget, "Selected gas payment");
        Ok(GasData {
            payment,
            owner: *owner,
            price,
            budget,
        })
    }

    /// Inner system state for `network_version`: the `value.fields` of the
    /// system object's dynamic field at that index.
    async fn inner_system_state(&self, system_object_id: &ObjectId, version: u64) -> Result<Value> {
        let fields = self.ledger.get_dynamic_fields(system_object_id).await?;
        let entry = fields
            .get(version as usize)
            .ok_or(CeremonyError::ObjectNotFound(*system_object_id))?;

        let inner = self
            .ledger
            .get_dynamic_field_object(system_object_id, &entry.name)
            .await?
            .ok_or(CeremonyError::ObjectNotFound(entry.object_id))?;

        inner
            .fields()
            .and_then(|f| f.get("value"))
            .and_then(|v| v.get("fields"))
            .cloned()
            .ok_or_else(|| missing_field(&inner.object_id, "value.fields"))
    }

    /// Id of the shared secp256k1 protocol-state object.
    pub async fn protocol_state_id(
        &self,
        system_object_id: &ObjectId,
        version: u64,
    ) -> Result<ObjectId> {
        let state = self.inner_system_state(system_object_id, version).await?;
        id_field(&state, &["dwallet_2pc_mpc_secp256k1_id"], system_object_id)
    }

    pub async fn network_decryption_key_id(
        &self,
        system_object_id: &ObjectId,
        version: u64,
    ) -> Result<ObjectId> {
        let state = self.inner_system_state(system_object_id, version).await?;
        id_field(
            &state,
            &[
                "dwallet_network_decryption_key",
                "fields",
                "dwallet_network_decryption_key_id",
            ],
            system_object_id,
        )
    }

    /// Public output of the network DKG held by the decryption key object.
    pub async fn network_public_output(&self, key_id: &ObjectId) -> Result<Vec<u8>> {
        let object = self
            .ledger
            .get_object(key_id, ObjectOptions::full())
            .await?
            .ok_or(CeremonyError::ObjectNotFound(*key_id))?;

        let raw = object
            .fields()
            .and_then(|f| f.get("network_dkg_public_output"))
            .ok_or_else(|| missing_field(key_id, "network_dkg_public_output"))?;
        serde_json::from_value(raw.clone())
            .map_err(|e| CeremonyError::Ledger(LedgerError::Decode(e.to_string())))
    }

    /// Poll an object until `predicate` holds or `timeout` elapses.
    pub async fn wait_for_object<F>(
        &self,
        object_id: &ObjectId,
        interval: Duration,
        timeout: Duration,
        predicate: F,
    ) -> Result<ObjectData>
    where
        F: Fn(&ObjectData) -> bool,
    {
        let start = Instant::now();

        loop {
            if let Some(object) = self.ledger.get_object(object_id, ObjectOptions::full()).await? {
                if predicate(&object) {
                    LogEvent::new(EventType::ObjectStateReached)
                        .with_context("object_id", object_id.to_string())
                        .with_duration(start.elapsed())
                        .emit();
                    return Ok(object);
                }
            }

            if start.elapsed() >= timeout {
                return Err(CeremonyError::ObjectStateTimeout {
                    object_id: *object_id,
                    elapsed: start.elapsed(),
                });
            }
            sleep(interval).await;
        }
    }

    /// Wait for a dWallet to become `Active` and return its public output.
    pub async fn wait_for_active_dwallet(
        &self,
        dwallet_id: &ObjectId,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let object = self
            .wait_for_object(dwallet_id, interval, timeout, |o| {
                o.content
                    .as_ref()
                    .and_then(DWalletState::from_content)
                    .map(|s| s.is_active())
                    .unwrap_or(false)
            })
            .await?;

        info!(dwallet_id = %dwallet_id, "dWallet is active");
        match object.content.as_ref().and_then(DWalletState::from_content) {
            Some(DWalletState::Active { public_output }) => Ok(public_output),
            _ => Err(missing_field(dwallet_id, "state")),
        }
    }
}

fn missing_field(object_id: &ObjectId, field: &str) -> CeremonyError {
    CeremonyError::Ledger(LedgerError::Decode(format!(
        "Object {} has no field {}",
        object_id, field
    )))
}

fn id_field(value: &Value, path: &[&str], object_id: &ObjectId) -> Result<ObjectId> {
    let raw = path
        .iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field(object_id, &path.join(".")))?;
    Ok(raw.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::{DynamicFieldName, InMemoryLedger};
    use serde_json::json;
    use std::sync::Arc;

    async fn ledger_with_system() -> (Arc<InMemoryLedger>, ObjectId) {
        let ledger = Arc::new(InMemoryLedger::new());
        let system = ObjectId::from_u8(0x10);
        ledger
            .insert_dynamic_field(
                system,
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
                            "dwallet_2pc_mpc_secp256k1_id": ObjectId::from_u8(0x20).to_hex(),
                            "dwallet_network_decryption_key": { "fields": {
                                "dwallet_network_decryption_key_id": "0x30"
                            }}
                        }}}
                    })),
                },
            )
            .await;
        (ledger, system)
    }

    #[tokio::test]
    async fn test_resolve_shared() {
        let ledger = Arc::new(InMemoryLedger::new());
        let id = ObjectId::from_u8(1);
        ledger.insert_shared_object(id, 7, json!({})).await;

        let resolver = Resolver::new(ledger);
        let obj = resolver.resolve(&id, true).await.unwrap();
        assert_eq!(obj.initial_shared_version, 7);
        assert!(obj.mutable);
    }

    #[tokio::test]
    async fn test_resolve_missing_and_owned() {
        let ledger = Arc::new(InMemoryLedger::new());
        let owned = ObjectId::from_u8(2);
        ledger
            .insert_object(ObjectData {
                object_id: owned,
                version: 1,
                digest: None,
                object_type: None,
                owner: Some(Owner::AddressOwner(ObjectId::from_u8(9))),
                content: None,
            })
            .await;

        let resolver = Resolver::new(ledger);
        assert!(matches!(
            resolver.resolve(&ObjectId::from_u8(1), false).await,
            Err(CeremonyError::ObjectNotFound(_))
        ));
        assert!(matches!(
            resolver.resolve(&owned, false).await,
            Err(CeremonyError::NotSharedObject(_))
        ));
    }

    #[tokio::test]
    async fn test_object_ref_needs_digest() {
        let ledger = Arc::new(InMemoryLedger::new());
        let cap = ObjectId::from_u8(7);
        ledger.insert_owned_object(cap, ObjectId::from_u8(9)).await;
        ledger
            .insert_object(ObjectData {
                object_id: ObjectId::from_u8(8),
                version: 3,
                digest: None,
                object_type: None,
                owner: None,
                content: None,
            })
            .await;

        let resolver = Resolver::new(ledger);
        let obj = resolver.object_ref(&cap).await.unwrap();
        assert_eq!(obj.object_id, cap);
        assert_eq!(obj.version, 1);
        assert!(resolver.object_ref(&ObjectId::from_u8(8)).await.is_err());
        assert!(matches!(
            resolver.object_ref(&ObjectId::from_u8(1)).await,
            Err(CeremonyError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_gas_data_covers_budget() {
        let ledger = Arc::new(InMemoryLedger::new());
        let owner = ObjectId::from_u8(9);
        let resolver = Resolver::new(ledger.clone());

        let gas = resolver.gas_data(&owner, 5_000).await.unwrap();
        assert_eq!(gas.owner, owner);
        assert_eq!(gas.budget, 5_000);
        assert_eq!(gas.price, ledger::memory::REFERENCE_GAS_PRICE);
        assert_eq!(gas.payment.len(), 1);

        ledger.set_gas_balance(4_999).await;
        assert!(matches!(
            resolver.gas_data(&owner, 5_000).await,
            Err(CeremonyError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_discovery_through_system_state() {
        let (ledger, system) = ledger_with_system().await;
        let resolver = Resolver::new(ledger);

        assert_eq!(
            resolver.protocol_state_id(&system, 0).await.unwrap(),
            ObjectId::from_u8(0x20)
        );
        assert_eq!(
            resolver.network_decryption_key_id(&system, 0).await.unwrap(),
            ObjectId::from_u8(0x30)
        );
        assert!(matches!(
            resolver.protocol_state_id(&system, 1).await,
            Err(CeremonyError::ObjectNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_active_dwallet() {
        let ledger = Arc::new(InMemoryLedger::new());
        let dwallet = ObjectId::from_u8(4);
        let object = |variant: &str| ObjectData {
            object_id: dwallet,
            version: 1,
            digest: None,
            object_type: None,
            owner: None,
            content: Some(json!({
                "fields": { "state": { "variant": variant, "fields": { "public_output": [9] } } }
            })),
        };
        ledger.insert_object(object("AwaitingNetworkVerification")).await;
        ledger
            .update_object_after(object("Active"), Duration::from_secs(12))
            .await;

        let resolver = Resolver::new(ledger);
        let output = resolver
            .wait_for_active_dwallet(&dwallet, Duration::from_secs(5), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(output, vec![9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_object_times_out() {
        let ledger = Arc::new(InMemoryLedger::new());
        let resolver = Resolver::new(ledger);
        let err = resolver
            .wait_for_object(
                &ObjectId::from_u8(4),
                Duration::from_secs(1),
                Duration::from_secs(3),
                |_| true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ObjectStateTimeout { .. }));
    }
}
