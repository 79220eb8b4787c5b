//! JSON-RPC ledger client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use common::{string_or_u64, Address, LedgerError, LedgerEvent, ObjectId};

use crate::client::{
    CreatedObject, DynamicFieldInfo, DynamicFieldName, EventPage, EventQuery, ExecutionResult,
    ExecutionStatus, GasCoin, LedgerClient, ObjectData, ObjectOptions,
};

/// Native coin type that pays for gas.
pub const GAS_COIN_TYPE: &str = "0x2::sui::SUI";
use crate::transaction::SignedTransaction;

/// RPC client configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub request_timeout: std::time::Duration,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct LedgerRpcClient {
    config: RpcConfig,
    client: reqwest::Client,
}

impl LedgerRpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LedgerError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Make an RPC call.
    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(method, "Ledger RPC call");

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("RPC request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Transport(format!(
                "RPC HTTP error {}: {}",
                status, body
            )));
        }

        let result: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(format!("Failed to parse RPC response: {}", e)))?;

        if let Some(error) = result.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        result
            .result
            .ok_or_else(|| LedgerError::Decode(format!("{} returned null result", method)))
    }
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct TransactionBlockResponse {
    digest: String,
    effects: Option<Effects>,
    #[serde(default)]
    events: Vec<LedgerEvent>,
    #[serde(rename = "objectChanges", default)]
    object_changes: Vec<ObjectChange>,
}

#[derive(Debug, Deserialize)]
struct Effects {
    status: ExecutionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ObjectChange {
    Created {
        #[serde(rename = "objectId")]
        object_id: ObjectId,
        #[serde(rename = "objectType")]
        object_type: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    data: Option<ObjectData>,
    error: Option<Value>,
}

impl ObjectResponse {
    /// `notExists` and `deleted` map to `None`; other errors surface.
    fn into_object(self) -> Result<Option<ObjectData>, LedgerError> {
        if let Some(data) = self.data {
            return Ok(Some(data));
        }
        match self.error {
            None => Ok(None),
            Some(err) => {
                let code = err.get("code").and_then(Value::as_str).unwrap_or_default();
                if code == "notExists" || code == "deleted" {
                    Ok(None)
                } else {
                    Err(LedgerError::Decode(format!("Object lookup failed: {}", err)))
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DynamicFieldPage {
    data: Vec<DynamicFieldInfo>,
    next_cursor: Option<Value>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinPage {
    data: Vec<GasCoin>,
    next_cursor: Option<Value>,
    #[serde(default)]
    has_next_page: bool,
}

/// Positional parameters of `suix_queryEvents`.
fn query_events_params(query: &EventQuery) -> Vec<Value> {
    vec![
        query.filter.to_json(),
        json!(query.cursor),
        json!(query.limit),
        json!(query.descending),
    ]
}

#[async_trait]
impl LedgerClient for LedgerRpcClient {
    async fn submit_and_execute(
        &self,
        tx: &SignedTransaction,
    ) -> Result<ExecutionResult, LedgerError> {
        let response: TransactionBlockResponse = self
            .call(
                "sui_executeTransactionBlock",
                vec![
                    json!(tx.tx_bytes),
                    json!(tx.signatures),
                    json!({
                        "showEffects": true,
                        "showEvents": true,
                        "showObjectChanges": true,
                    }),
                    json!("WaitForLocalExecution"),
                ],
            )
            .await?;

        let status = response
            .effects
            .map(|e| e.status)
            .ok_or_else(|| LedgerError::Decode("Execution response missing effects".into()))?;

        let created_objects = response
            .object_changes
            .into_iter()
            .filter_map(|change| match change {
                ObjectChange::Created {
                    object_id,
                    object_type,
                } => Some(CreatedObject {
                    object_id,
                    object_type,
                }),
                ObjectChange::Other => None,
            })
            .collect();

        Ok(ExecutionResult {
            digest: response.digest,
            status,
            events: response.events,
            created_objects,
        })
    }

    async fn query_events(&self, query: &EventQuery) -> Result<EventPage, LedgerError> {
        self.call("suix_queryEvents", query_events_params(query))
            .await
    }

    async fn get_object(
        &self,
        id: &ObjectId,
        options: ObjectOptions,
    ) -> Result<Option<ObjectData>, LedgerError> {
        let response: ObjectResponse = self
            .call("sui_getObject", vec![json!(id), json!(options)])
            .await?;
        response.into_object()
    }

    async fn get_dynamic_fields(
        &self,
        parent: &ObjectId,
    ) -> Result<Vec<DynamicFieldInfo>, LedgerError> {
        let mut fields = Vec::new();
        let mut cursor = Value::Null;

        loop {
            let page: DynamicFieldPage = self
                .call("suix_getDynamicFields", vec![json!(parent), cursor])
                .await?;
            fields.extend(page.data);

            match page.next_cursor {
                Some(next) if page.has_next_page => cursor = next,
                _ => break,
            }
        }
        Ok(fields)
    }

    async fn get_dynamic_field_object(
        &self,
        parent: &ObjectId,
        name: &DynamicFieldName,
    ) -> Result<Option<ObjectData>, LedgerError> {
        let response: ObjectResponse = self
            .call(
                "suix_getDynamicFieldObject",
                vec![json!(parent), json!(name)],
            )
            .await?;
        response.into_object()
    }

    async fn gas_coins(&self, owner: &Address) -> Result<Vec<GasCoin>, LedgerError> {
        let mut coins = Vec::new();
        let mut cursor = Value::Null;

        loop {
            let page: CoinPage = self
                .call(
                    "suix_getCoins",
                    vec![json!(owner), json!(GAS_COIN_TYPE), cursor],
                )
                .await?;
            coins.extend(page.data);

            match page.next_cursor {
                Some(next) if page.has_next_page => cursor = next,
                _ => break,
            }
        }
        Ok(coins)
    }

    async fn reference_gas_price(&self) -> Result<u64, LedgerError> {
        let price: Value = self.call("suix_getReferenceGasPrice", vec![]).await?;
        Ok(string_or_u64(price)?)
    }
}
