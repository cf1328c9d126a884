//! Core ledger types

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Recipient address in its encoded string form
pub type Address = String;

/// Amount in the smallest currency unit
pub type Amount = u64;

/// The all-zero hash. Used as the genesis previous hash and the coinbase sentinel.
pub const ZERO_HASH: Hash = [0u8; 32];

/// OutPoint: reference to output `index` of transaction `hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// The (empty hash, 0) pair carried by coinbase inputs
    pub fn coinbase() -> Self {
        Self { hash: ZERO_HASH, index: 0 }
    }

    pub fn is_coinbase(&self) -> bool {
        self.hash == ZERO_HASH && self.index == 0
    }
}

/// Transaction input. `signature` and `public_key` authorize the spend and are
/// not part of the transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub signature: ByteString,
    pub public_key: ByteString,
}

impl TransactionInput {
    /// Unsigned input spending `prevout`
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            signature: Vec::new(),
            public_key: Vec::new(),
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Amount,
    pub address: Address,
    /// Opaque lock-script tag. Never executed.
    pub lock_script: String,
}

/// Transaction. `hash` is derived from every other field except input
/// authorization data; see [`Transaction::compute_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: i64,
    pub timestamp: i64,
    pub hash: Hash,
}

/// Block header. Everything the block hash commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: i64,
    pub difficulty: u32,
    pub nonce: u64,
    pub height: u64,
}

/// Block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub miner: Address,
    pub hash: Hash,
}

/// Unspent transaction output, keyed by its [`OutPoint`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub address: Address,
    pub lock_script: String,
    /// Height of the block that created this output
    pub height: u64,
}
