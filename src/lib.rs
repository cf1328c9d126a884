//! # Ledger Core
//!
//! Proof-of-work ledger and consensus core: UTXO accounting, mempool
//! admission, nonce search, difficulty retargeting, a halving reward
//! schedule, and the chain orchestrator that validates and appends blocks.
//!
//! ## Architecture
//!
//! - Ledger model (`types`, `transaction`, `block`): hashing, merkle roots, validation rules
//! - UTXO set (`utxo`): live spendable outputs plus staged views for block validation
//! - Mempool (`mempool`): bounded, priority-ordered pool with background expiry
//! - PoW engine (`pow`), difficulty adjuster (`difficulty`), reward calculator (`economic`)
//! - Chain orchestrator (`chain`) and block assembly (`mining`)
//! - Collaborators: `storage` (persistence) and `crypto` (keys, signatures, addresses)
//!
//! ## Design Principles
//!
//! 1. **Typed rejections**: every rule violation surfaces as a specific error variant
//! 2. **No divergence**: a failed block submission leaves memory and storage untouched
//! 3. **Explicit parameters**: genesis parameters are a configuration value, never global state
//! 4. **Exact Version Pinning**: consensus-critical hashing and signature crates are pinned
//!
//! ## Usage
//!
//! ```rust
//! use ledger_core::{Blockchain, Miner, NodeConfig};
//!
//! let chain = Blockchain::in_memory(NodeConfig::regtest(), "VDXminer").unwrap();
//! assert_eq!(chain.len(), 1);
//!
//! let block = chain.mine_next_block(&Miner::new(), "VDXminer").unwrap();
//! assert_eq!(block.height(), 1);
//! assert_eq!(chain.chain_info().blocks, 2);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod config;
pub mod crypto;
pub mod transaction;
pub mod block;
pub mod utxo;
pub mod mempool;
pub mod pow;
pub mod difficulty;
pub mod economic;
pub mod storage;
pub mod chain;
pub mod mining;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{BlockError, ConsensusError, Result, StorageError, TxError};
pub use config::{GenesisConfig, MempoolConfig, NodeConfig};
pub use crypto::KeyPair;
pub use utxo::{UtxoDelta, UtxoSet, UtxoView};
pub use mempool::{ExpirySweeper, Mempool, MempoolEntry};
pub use pow::ProofOfWork;
pub use difficulty::DifficultyAdjuster;
pub use economic::RewardCalculator;
pub use storage::{MemoryStorage, Storage, StorageStats};
pub use chain::{Blockchain, ChainInfo};
pub use mining::{BlockTemplate, Miner};
