//! Ledger access for the ceremony client.
//!
//! - [`client`]: the [`LedgerClient`] trait and its wire types
//! - [`transaction`]: programmable transaction building, BCS encoding and
//!   ed25519 signing
//! - [`rpc`]: JSON-RPC implementation
//! - [`memory`]: scriptable in-memory implementation

pub mod client;
pub mod memory;
pub mod rpc;
pub mod transaction;

pub use client::{
    CreatedObject, DynamicFieldInfo, DynamicFieldName, EventFilter, EventPage, EventQuery,
    ExecutionResult, ExecutionStatus, GasCoin, LedgerClient, ObjectData, ObjectOptions, Owner,
    SharedLedger,
};
pub use common::LedgerError;
pub use memory::InMemoryLedger;
pub use rpc::{LedgerRpcClient, RpcConfig};
pub use transaction::{
    address_from_key, Argument, GasData, ObjectDigest, ObjectRef, SignedTransaction,
    TransactionBuilder, TransactionData, TransactionExpiration, TypeTag,
};
