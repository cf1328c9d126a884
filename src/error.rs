//! Error types for ledger validation and state transitions

use thiserror::Error;

/// Storage collaborator failure. Fatal for the enclosing call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage is closed")]
    Closed,
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Why a transaction was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction has no inputs")]
    NoInputs,

    #[error("transaction has no outputs")]
    NoOutputs,

    #[error("stored hash does not match transaction contents")]
    HashMismatch,

    #[error("input {index} references an unknown or spent output")]
    MissingInput { index: usize },

    #[error("input {index} spends an output already spent in this block")]
    DoubleSpend { index: usize },

    #[error("input {index} spends an output claimed by a pooled transaction")]
    ConflictsWithPool { index: usize },

    #[error("input {index} is not authorized: {reason}")]
    Unauthorized { index: usize, reason: String },

    #[error("outputs ({outputs}) exceed inputs ({inputs})")]
    InsufficientInput { inputs: u64, outputs: u64 },

    #[error("value overflow while summing amounts")]
    ValueOverflow,

    #[error("coinbase transaction outside a block")]
    UnexpectedCoinbase,

    #[error("output {index} already exists and is unspent")]
    DuplicateOutput { index: usize },
}

/// Why a block was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid block height: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },

    #[error("previous block hash does not match chain tip")]
    PrevHashMismatch,

    #[error("first block must be genesis block")]
    NotGenesis,

    #[error("block must have at least coinbase transaction")]
    NoTransactions,

    #[error("block has {count} transactions, limit is {limit}")]
    TooManyTransactions { count: usize, limit: usize },

    #[error("first transaction must be coinbase")]
    FirstNotCoinbase,

    #[error("only first transaction can be coinbase (found at index {index})")]
    ExtraCoinbase { index: usize },

    #[error("coinbase lock time {got} does not commit to height {expected}")]
    CoinbaseHeightMismatch { expected: u64, got: i64 },

    #[error("transaction {index} invalid: {source}")]
    InvalidTransaction {
        index: usize,
        #[source]
        source: TxError,
    },

    #[error("coinbase pays {paid}, allowed {allowed}")]
    CoinbaseOverpay { paid: u64, allowed: u64 },

    #[error("invalid merkle root")]
    MerkleMismatch,

    #[error("stored block hash does not match header")]
    HashMismatch,

    #[error("difficulty {got} does not match required {expected}")]
    DifficultyMismatch { expected: u32, got: u32 },

    #[error("invalid proof of work")]
    InsufficientWork,
}

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Block validation failed: {0}")]
    InvalidBlock(#[from] BlockError),

    #[error("Transaction validation failed: {0}")]
    InvalidTransaction(#[from] TxError),

    #[error("Mempool full, max size: {capacity}")]
    MempoolFull { capacity: usize },

    #[error("Transaction already known: {0}")]
    DuplicateTransaction(String),

    #[error("Nonce space exhausted between {start} and {end}")]
    NonceSpaceExhausted { start: u64, end: u64 },

    #[error("Mining aborted")]
    MiningAborted,

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
