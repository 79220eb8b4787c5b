//! Programmable transaction building and signing.
//!
//! A transaction is a list of inputs (pure values or object references) and
//! a list of commands (Move calls, transfers) whose results can feed later
//! commands. Session-initiating transactions pay their MPC fee with a
//! zero-value coin minted by `0x2::coin::zero` and consumed by
//! `0x2::coin::destroy_zero` in the same transaction; [`TransactionBuilder::finish`]
//! refuses to produce a transaction that leaves a zero coin alive.
//!
//! Types serialize to the node's BCS layout: variant order, field order and
//! the versioned `TransactionData` envelope all matter. The signing digest
//! is Blake2b-256 over the intent prefix and the BCS bytes.

use std::collections::HashMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use common::{Address, LedgerError, ObjectId, SharedObjectRef};

type Blake2b256 = Blake2b<U32>;

/// Framework package holding `coin`.
pub const FRAMEWORK_PACKAGE: ObjectId = ObjectId::from_u8(2);

/// Intent prefix for user transaction data: scope, version, app id.
pub const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

/// Signature scheme flag for ed25519.
pub const ED25519_FLAG: u8 = 0x00;

// ============================================================================
// Object references
// ============================================================================

/// Content digest of an object version. Base58 in JSON, length-prefixed
/// bytes in BCS.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectDigest([u8; 32]);

impl ObjectDigest {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_base58(encoded: &str) -> Result<Self, LedgerError> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| LedgerError::Decode(format!("Invalid object digest {}: {}", encoded, e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            LedgerError::Decode(format!("Object digest must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for ObjectDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectDigest({})", self)
    }
}

impl Serialize for ObjectDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for ObjectDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_base58(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("object digest must be 32 bytes"))?;
            Ok(Self(bytes))
        }
    }
}

/// An owned object at a specific version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_id: ObjectId,
    pub version: u64,
    pub digest: ObjectDigest,
}

// ============================================================================
// Type tags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    Bool,
    U8,
    U64,
    U128,
    Address,
    Signer,
    Vector(Box<TypeTag>),
    Struct(Box<StructTag>),
    U16,
    U32,
    U256,
}

impl TypeTag {
    /// `address::module::name` without type parameters.
    pub fn struct_tag(address: ObjectId, module: &str, name: &str) -> Self {
        TypeTag::Struct(Box::new(StructTag {
            address,
            module: module.to_string(),
            name: name.to_string(),
            type_params: Vec::new(),
        }))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => f.write_str("bool"),
            TypeTag::U8 => f.write_str("u8"),
            TypeTag::U16 => f.write_str("u16"),
            TypeTag::U32 => f.write_str("u32"),
            TypeTag::U64 => f.write_str("u64"),
            TypeTag::U128 => f.write_str("u128"),
            TypeTag::U256 => f.write_str("u256"),
            TypeTag::Address => f.write_str("address"),
            TypeTag::Signer => f.write_str("signer"),
            TypeTag::Vector(inner) => write!(f, "vector<{}>", inner),
            TypeTag::Struct(tag) => write!(f, "{}", tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructTag {
    pub address: ObjectId,
    pub module: String,
    pub name: String,
    pub type_params: Vec<TypeTag>,
}

impl fmt::Display for StructTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.address, self.module, self.name)?;
        if let Some((first, rest)) = self.type_params.split_first() {
            write!(f, "<{}", first)?;
            for param in rest {
                write!(f, ", {}", param)?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

// ============================================================================
// Transaction Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectArg {
    ImmOrOwned(ObjectRef),
    Shared {
        id: ObjectId,
        initial_shared_version: u64,
        mutable: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallArg {
    /// Pre-encoded value bytes.
    Pure(Vec<u8>),
    Object(ObjectArg),
}

/// Reference to a transaction input or an earlier command's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Argument {
    GasCoin,
    Input(u16),
    Result(u16),
    NestedResult(u16, u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCall {
    pub package: ObjectId,
    pub module: String,
    pub function: String,
    pub type_arguments: Vec<TypeTag>,
    pub arguments: Vec<Argument>,
}

impl MoveCall {
    fn is(&self, package: &ObjectId, module: &str, function: &str) -> bool {
        &self.package == package && self.module == module && self.function == function
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    MoveCall(MoveCall),
    TransferObjects(Vec<Argument>, Argument),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgrammableTransaction {
    pub inputs: Vec<CallArg>,
    pub commands: Vec<Command>,
}

impl ProgrammableTransaction {
    pub fn move_calls(&self) -> impl Iterator<Item = &MoveCall> {
        self.commands.iter().filter_map(|c| match c {
            Command::MoveCall(call) => Some(call),
            _ => None,
        })
    }
}

/// Coins paying for execution and the price the sender accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasData {
    pub payment: Vec<ObjectRef>,
    pub owner: Address,
    pub price: u64,
    pub budget: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransactionExpiration {
    #[default]
    None,
    Epoch(u64),
}

/// Everything the sender signs.
///
/// `kind` is always a programmable transaction and is encoded as that
/// variant of the node's transaction-kind enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    #[serde(with = "programmable_kind")]
    pub kind: ProgrammableTransaction,
    pub sender: Address,
    pub gas_data: GasData,
    pub expiration: TransactionExpiration,
}

mod programmable_kind {
    use super::ProgrammableTransaction;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    enum KindRef<'a> {
        ProgrammableTransaction(&'a ProgrammableTransaction),
    }

    #[derive(Deserialize)]
    enum Kind {
        ProgrammableTransaction(ProgrammableTransaction),
    }

    pub fn serialize<S: Serializer>(
        kind: &ProgrammableTransaction,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        KindRef::ProgrammableTransaction(kind).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<ProgrammableTransaction, D::Error> {
        let Kind::ProgrammableTransaction(kind) = Kind::deserialize(deserializer)?;
        Ok(kind)
    }
}

#[derive(Serialize)]
enum VersionedRef<'a> {
    V1(&'a TransactionData),
}

#[derive(Deserialize)]
enum Versioned {
    V1(TransactionData),
}

impl TransactionData {
    /// BCS bytes of the versioned envelope, as submitted in `tx_bytes`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        bcs::to_bytes(&VersionedRef::V1(self))
            .map_err(|e| LedgerError::Signing(format!("Failed to encode transaction: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        let Versioned::V1(data) = bcs::from_bytes(bytes)
            .map_err(|e| LedgerError::Decode(format!("Invalid transaction bytes: {}", e)))?;
        Ok(data)
    }

    /// Encode, prefix with the transaction intent and sign with `key`.
    pub fn sign(&self, key: &SigningKey) -> Result<SignedTransaction, LedgerError> {
        let bytes = self.to_bytes()?;
        let signature = key.sign(&intent_digest(&bytes));

        let mut serialized = Vec::with_capacity(1 + 64 + 32);
        serialized.push(ED25519_FLAG);
        serialized.extend_from_slice(&signature.to_bytes());
        serialized.extend_from_slice(key.verifying_key().as_bytes());

        Ok(SignedTransaction {
            tx_bytes: BASE64.encode(&bytes),
            signatures: vec![BASE64.encode(&serialized)],
        })
    }
}

fn intent_digest(tx_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(TRANSACTION_INTENT);
    hasher.update(tx_bytes);
    hasher.finalize().into()
}

/// Ledger address controlled by an ed25519 key.
pub fn address_from_key(key: &VerifyingKey) -> Address {
    let mut hasher = Blake2b256::new();
    hasher.update([ED25519_FLAG]);
    hasher.update(key.as_bytes());
    ObjectId::new(hasher.finalize().into())
}

/// A transaction ready for submission. Both fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx_bytes: String,
    pub signatures: Vec<String>,
}

impl SignedTransaction {
    /// Decode the transaction data without checking signatures.
    pub fn data(&self) -> Result<TransactionData, LedgerError> {
        let bytes = BASE64
            .decode(&self.tx_bytes)
            .map_err(|e| LedgerError::Decode(format!("Invalid base64 tx_bytes: {}", e)))?;
        TransactionData::from_bytes(&bytes)
    }

    /// Decode the transaction and check that every signature is valid and
    /// that one of them belongs to the sender.
    pub fn verify(&self) -> Result<TransactionData, LedgerError> {
        let bytes = BASE64
            .decode(&self.tx_bytes)
            .map_err(|e| LedgerError::Decode(format!("Invalid base64 tx_bytes: {}", e)))?;
        let data = TransactionData::from_bytes(&bytes)?;
        let digest = intent_digest(&bytes);

        let mut signed_by_sender = false;
        for encoded in &self.signatures {
            let raw = BASE64
                .decode(encoded)
                .map_err(|e| LedgerError::Signing(format!("Invalid base64 signature: {}", e)))?;
            if raw.len() != 1 + 64 + 32 || raw[0] != ED25519_FLAG {
                return Err(LedgerError::Signing("Unsupported signature encoding".into()));
            }

            let sig_bytes: [u8; 64] = raw[1..65]
                .try_into()
                .map_err(|_| LedgerError::Signing("Bad signature length".into()))?;
            let pk_bytes: [u8; 32] = raw[65..]
                .try_into()
                .map_err(|_| LedgerError::Signing("Bad public key length".into()))?;
            let key = VerifyingKey::from_bytes(&pk_bytes)
                .map_err(|e| LedgerError::Signing(format!("Invalid public key: {}", e)))?;

            key.verify(&digest, &Signature::from_bytes(&sig_bytes))
                .map_err(|e| LedgerError::Signing(format!("Signature check failed: {}", e)))?;

            signed_by_sender |= address_from_key(&key) == data.sender;
        }

        if !signed_by_sender {
            return Err(LedgerError::Signing("Missing sender signature".into()));
        }
        Ok(data)
    }
}

// ============================================================================
// Pure value encoding
// ============================================================================

/// ULEB128 length prefix used for vectors.
fn encode_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 4);
    encode_length(bytes.len(), &mut out);
    out.extend_from_slice(bytes);
    out
}

pub fn encode_byte_vectors(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_length(items.len(), &mut out);
    for item in items {
        encode_length(item.len(), &mut out);
        out.extend_from_slice(item);
    }
    out
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Debug, Default)]
pub struct TransactionBuilder {
    inputs: Vec<CallArg>,
    commands: Vec<Command>,
    shared_inputs: HashMap<ObjectId, u16>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn input(&mut self, arg: CallArg) -> Argument {
        let idx = self.inputs.len() as u16;
        self.inputs.push(arg);
        Argument::Input(idx)
    }

    fn command(&mut self, command: Command) -> Argument {
        let idx = self.commands.len() as u16;
        self.commands.push(command);
        Argument::Result(idx)
    }

    /// An object id as its raw 32 bytes.
    pub fn pure_id(&mut self, id: &ObjectId) -> Argument {
        self.input(CallArg::Pure(id.as_bytes().to_vec()))
    }

    pub fn pure_u8(&mut self, value: u8) -> Argument {
        self.input(CallArg::Pure(vec![value]))
    }

    pub fn pure_u32(&mut self, value: u32) -> Argument {
        self.input(CallArg::Pure(value.to_le_bytes().to_vec()))
    }

    pub fn pure_u64(&mut self, value: u64) -> Argument {
        self.input(CallArg::Pure(value.to_le_bytes().to_vec()))
    }

    /// A `vector<u8>` argument.
    pub fn pure_bytes(&mut self, bytes: &[u8]) -> Argument {
        self.input(CallArg::Pure(encode_bytes(bytes)))
    }

    /// A `vector<vector<u8>>` argument.
    pub fn pure_byte_vectors(&mut self, items: &[Vec<u8>]) -> Argument {
        self.input(CallArg::Pure(encode_byte_vectors(items)))
    }

    /// Reference a shared object. Repeated references to the same object
    /// reuse one input; mutability is upgraded if any use needs it.
    pub fn shared_object(&mut self, obj: &SharedObjectRef) -> Argument {
        if let Some(&idx) = self.shared_inputs.get(&obj.object_id) {
            if let CallArg::Object(ObjectArg::Shared { mutable, .. }) =
                &mut self.inputs[idx as usize]
            {
                *mutable |= obj.mutable;
            }
            return Argument::Input(idx);
        }

        let arg = self.input(CallArg::Object(ObjectArg::Shared {
            id: obj.object_id,
            initial_shared_version: obj.initial_shared_version,
            mutable: obj.mutable,
        }));
        if let Argument::Input(idx) = arg {
            self.shared_inputs.insert(obj.object_id, idx);
        }
        arg
    }

    pub fn owned_object(&mut self, object: &ObjectRef) -> Argument {
        self.input(CallArg::Object(ObjectArg::ImmOrOwned(*object)))
    }

    pub fn move_call(
        &mut self,
        package: ObjectId,
        module: &str,
        function: &str,
        type_arguments: Vec<TypeTag>,
        arguments: Vec<Argument>,
    ) -> Argument {
        self.command(Command::MoveCall(MoveCall {
            package,
            module: module.to_string(),
            function: function.to_string(),
            type_arguments,
            arguments,
        }))
    }

    /// Mint a zero-value coin of `coin_type` for fee payment.
    pub fn zero_coin(&mut self, coin_type: &TypeTag) -> Argument {
        self.move_call(
            FRAMEWORK_PACKAGE,
            "coin",
            "zero",
            vec![coin_type.clone()],
            vec![],
        )
    }

    /// Consume a coin created by [`zero_coin`](Self::zero_coin).
    pub fn destroy_zero(&mut self, coin: Argument, coin_type: &TypeTag) {
        self.move_call(
            FRAMEWORK_PACKAGE,
            "coin",
            "destroy_zero",
            vec![coin_type.clone()],
            vec![coin],
        );
    }

    pub fn transfer_objects(&mut self, objects: Vec<Argument>, recipient: Argument) {
        self.command(Command::TransferObjects(objects, recipient));
    }

    /// Finish building. Fails when a zero coin is left undestroyed.
    pub fn finish(self) -> Result<ProgrammableTransaction, LedgerError> {
        let ptb = ProgrammableTransaction {
            inputs: self.inputs,
            commands: self.commands,
        };
        validate_zero_coins(&ptb)?;
        Ok(ptb)
    }
}

/// Every `coin::zero` result must be consumed by exactly one later
/// `coin::destroy_zero` in the same transaction.
pub fn validate_zero_coins(ptb: &ProgrammableTransaction) -> Result<(), LedgerError> {
    for (idx, command) in ptb.commands.iter().enumerate() {
        let Command::MoveCall(call) = command else {
            continue;
        };
        if !call.is(&FRAMEWORK_PACKAGE, "coin", "zero") {
            continue;
        }

        let coin = Argument::Result(idx as u16);
        let destroyed = ptb.commands[idx + 1..]
            .iter()
            .filter(|c| match c {
                Command::MoveCall(call) => {
                    call.is(&FRAMEWORK_PACKAGE, "coin", "destroy_zero")
                        && call.arguments.first() == Some(&coin)
                }
                _ => false,
            })
            .count();

        if destroyed != 1 {
            return Err(LedgerError::Signing(format!(
                "Zero coin from command {} destroyed {} times, expected once",
                idx, destroyed
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn shared(n: u8) -> SharedObjectRef {
        SharedObjectRef {
            object_id: ObjectId::from_u8(n),
            initial_shared_version: 1,
            mutable: false,
        }
    }

    fn coin_type() -> TypeTag {
        TypeTag::struct_tag(ObjectId::from_u8(1), "ika", "IKA")
    }

    fn gas(owner: Address, budget: u64) -> GasData {
        GasData {
            payment: Vec::new(),
            owner,
            price: 1_000,
            budget,
        }
    }

    fn data(sender: Address, kind: ProgrammableTransaction, budget: u64) -> TransactionData {
        TransactionData {
            kind,
            sender,
            gas_data: gas(sender, budget),
            expiration: TransactionExpiration::None,
        }
    }

    #[test]
    fn test_length_prefix() {
        assert_eq!(encode_bytes(&[1, 2]), vec![2, 1, 2]);
        let long = vec![0u8; 200];
        let encoded = encode_bytes(&long);
        assert_eq!(&encoded[..2], &[0xc8, 0x01]);
        assert_eq!(encoded.len(), 202);
        assert_eq!(
            encode_byte_vectors(&[vec![9], vec![]]),
            vec![2, 1, 9, 0]
        );
    }

    #[test]
    fn test_address_is_blake2b_of_flagged_key() {
        let address = address_from_key(&key().verifying_key());
        assert_eq!(
            address.to_hex(),
            "0xa0ccc8bcc83f6c628340134f8546a21e0618fd1aaa02432bba454c4a2c2233da"
        );
    }

    #[test]
    fn test_transaction_data_bcs_layout() {
        let sender = ObjectId::from_u8(9);
        let bytes = data(sender, ProgrammableTransaction::default(), 5)
            .to_bytes()
            .unwrap();

        // V1, programmable kind, no inputs, no commands.
        assert_eq!(&bytes[..4], &[0, 0, 0, 0]);
        assert_eq!(&bytes[4..36], sender.as_bytes());
        // Empty payment, then the gas owner.
        assert_eq!(bytes[36], 0);
        assert_eq!(&bytes[37..69], sender.as_bytes());
        assert_eq!(&bytes[69..77], &1_000u64.to_le_bytes());
        assert_eq!(&bytes[77..85], &5u64.to_le_bytes());
        assert_eq!(bytes[85], 0);
        assert_eq!(bytes.len(), 86);

        assert_eq!(
            hex::encode(intent_digest(&bytes)),
            "8d2e7774c94058da91836ad50226819ee777f8b1e60d2f8c2585735ecc2ffd2a"
        );
    }

    #[test]
    fn test_inputs_and_calls_bcs_layout() {
        let owned = ObjectRef {
            object_id: ObjectId::from_u8(4),
            version: 2,
            digest: ObjectDigest::new([0xaa; 32]),
        };
        let mut b = TransactionBuilder::new();
        let pure = b.pure_u8(7);
        let cap = b.owned_object(&owned);
        b.move_call(
            ObjectId::from_u8(3),
            "m",
            "f",
            vec![coin_type()],
            vec![pure, cap, Argument::GasCoin],
        );
        let ptb = b.finish().unwrap();

        let encoded = bcs::to_bytes(&ptb.inputs[0]).unwrap();
        assert_eq!(encoded, vec![0, 1, 7]);

        let encoded = bcs::to_bytes(&ptb.inputs[1]).unwrap();
        // Object, ImmOrOwned, id, version, length-prefixed digest.
        assert_eq!(&encoded[..2], &[1, 0]);
        assert_eq!(&encoded[2..34], owned.object_id.as_bytes());
        assert_eq!(&encoded[34..42], &2u64.to_le_bytes());
        assert_eq!(encoded[42], 32);
        assert_eq!(encoded.len(), 75);

        let Command::MoveCall(call) = &ptb.commands[0] else {
            panic!("expected a move call");
        };
        let encoded = bcs::to_bytes(&call.arguments).unwrap();
        assert_eq!(encoded, vec![3, 1, 0, 0, 1, 1, 0, 0]);
        let encoded = bcs::to_bytes(&call.type_arguments[0]).unwrap();
        assert_eq!(encoded[0], 7);
        assert_eq!(&encoded[1..33], ObjectId::from_u8(1).as_bytes());
        assert_eq!(&encoded[33..], &[3, b'i', b'k', b'a', 3, b'I', b'K', b'A', 0]);
    }

    #[test]
    fn test_object_digest_base58() {
        let digest = ObjectDigest::new([1; 32]);
        let json = serde_json::to_value(digest).unwrap();
        let back: ObjectDigest = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, digest);
        assert_eq!(json, serde_json::json!(digest.to_string()));
        assert!(ObjectDigest::from_base58("3mJr7AoUXx2Wqd").is_err());
    }

    #[test]
    fn test_type_tag_display() {
        assert_eq!(
            coin_type().to_string(),
            format!("{}::ika::IKA", ObjectId::from_u8(1))
        );
        assert_eq!(TypeTag::Vector(Box::new(TypeTag::U8)).to_string(), "vector<u8>");
    }

    #[test]
    fn test_shared_object_deduplicated() {
        let mut b = TransactionBuilder::new();
        let a = b.shared_object(&shared(5));
        let mut again = shared(5);
        again.mutable = true;
        let c = b.shared_object(&again);
        assert_eq!(a, c);

        let ptb = b.finish().unwrap();
        assert_eq!(ptb.inputs.len(), 1);
        assert!(matches!(
            ptb.inputs[0],
            CallArg::Object(ObjectArg::Shared { mutable: true, .. })
        ));
    }

    #[test]
    fn test_zero_coin_must_be_destroyed() {
        let mut b = TransactionBuilder::new();
        let coin = b.zero_coin(&coin_type());
        b.move_call(ObjectId::from_u8(3), "m", "f", vec![], vec![coin]);
        assert!(b.finish().is_err());

        let mut b = TransactionBuilder::new();
        let coin = b.zero_coin(&coin_type());
        b.move_call(ObjectId::from_u8(3), "m", "f", vec![], vec![coin]);
        b.destroy_zero(coin, &coin_type());
        let ptb = b.finish().unwrap();
        assert_eq!(ptb.move_calls().count(), 3);
    }

    #[test]
    fn test_double_destroy_rejected() {
        let mut b = TransactionBuilder::new();
        let coin = b.zero_coin(&coin_type());
        b.destroy_zero(coin, &coin_type());
        b.destroy_zero(coin, &coin_type());
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let key = key();
        let mut b = TransactionBuilder::new();
        let id = b.pure_id(&ObjectId::from_u8(1));
        b.move_call(ObjectId::from_u8(3), "m", "f", vec![], vec![id]);

        let data = data(address_from_key(&key.verifying_key()), b.finish().unwrap(), 1_000);
        let signed = data.sign(&key).unwrap();
        assert_eq!(signed.verify().unwrap(), data);
        assert_eq!(signed.data().unwrap(), data);
    }

    #[test]
    fn test_verify_rejects_foreign_sender() {
        let key = key();
        let data = data(ObjectId::from_u8(9), ProgrammableTransaction::default(), 1);
        let signed = data.sign(&key).unwrap();
        assert!(matches!(signed.verify(), Err(LedgerError::Signing(_))));
    }

    #[test]
    fn test_tampered_bytes_fail_verification() {
        let key = key();
        let data = data(
            address_from_key(&key.verifying_key()),
            ProgrammableTransaction::default(),
            1,
        );
        let mut signed = data.sign(&key).unwrap();
        let mut other = data.clone();
        other.gas_data.budget = 2;
        signed.tx_bytes = BASE64.encode(other.to_bytes().unwrap());
        assert!(signed.verify().is_err());
    }
}
