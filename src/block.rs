//! Block construction, merkle commitment and header hashing

use crate::config::GenesisConfig;
use crate::crypto;
use crate::error::{BlockError, Result};
use crate::pow::ProofOfWork;
use crate::transaction::current_timestamp;
use crate::types::*;
use std::sync::atomic::AtomicBool;

impl Block {
    /// Assemble a block stamped with the current time. The nonce starts at
    /// zero; the block only carries valid work once mined.
    pub fn new(
        prev_block_hash: Hash,
        transactions: Vec<Transaction>,
        difficulty: u32,
        height: u64,
        miner: &str,
    ) -> Self {
        Self::with_timestamp(
            prev_block_hash,
            transactions,
            difficulty,
            height,
            miner,
            current_timestamp(),
        )
    }

    pub fn with_timestamp(
        prev_block_hash: Hash,
        transactions: Vec<Transaction>,
        difficulty: u32,
        height: u64,
        miner: &str,
        timestamp: i64,
    ) -> Self {
        let header = BlockHeader {
            version: crate::constants::LEDGER_VERSION,
            prev_block_hash,
            merkle_root: compute_merkle_root(&transactions),
            timestamp,
            difficulty,
            nonce: 0,
            height,
        };
        let hash = hash_header(&header);
        Block {
            header,
            transactions,
            miner: miner.to_string(),
            hash,
        }
    }

    pub fn compute_hash(&self) -> Hash {
        hash_header(&self.header)
    }

    /// Recompute `hash` after changing any header field
    pub fn refresh_hash(&mut self) {
        self.hash = self.compute_hash();
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_block_hash == ZERO_HASH
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn find_transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| &tx.hash == hash)
    }
}

/// ComputeMerkleRoot: 𝒯𝒳* → ℍ
///
/// Leaves are transaction hashes. Each level pairs adjacent hashes as
/// SHA256(left ‖ right), duplicating the last hash of an odd level.
/// An empty list yields the zero hash.
pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash).collect();
    merkle_root_from_hashes(hashes)
}

pub fn merkle_root_from_hashes(mut hashes: Vec<Hash>) -> Hash {
    if hashes.is_empty() {
        return ZERO_HASH;
    }

    while hashes.len() > 1 {
        if hashes.len() % 2 != 0 {
            let last = hashes[hashes.len() - 1];
            hashes.push(last);
        }

        hashes = hashes
            .chunks(2)
            .map(|pair| {
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(&pair[0]);
                combined[32..].copy_from_slice(&pair[1]);
                crypto::sha256(&combined)
            })
            .collect();
    }

    hashes[0]
}

/// Header bytes preceding the nonce. Mining appends candidate nonces to this.
pub fn header_material(header: &BlockHeader) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + 32 + 32 + 8 + 4 + 8);
    bytes.extend_from_slice(&header.version.to_le_bytes());
    bytes.extend_from_slice(&header.prev_block_hash);
    bytes.extend_from_slice(&header.merkle_root);
    bytes.extend_from_slice(&header.timestamp.to_le_bytes());
    bytes.extend_from_slice(&header.difficulty.to_le_bytes());
    bytes.extend_from_slice(&header.height.to_le_bytes());
    bytes
}

/// Full canonical header encoding: material followed by the nonce
pub fn serialize_header(header: &BlockHeader) -> Vec<u8> {
    let mut bytes = header_material(header);
    bytes.extend_from_slice(&header.nonce.to_le_bytes());
    bytes
}

/// SHA256(SHA256(header))
pub fn hash_header(header: &BlockHeader) -> Hash {
    crypto::double_sha256(&serialize_header(header))
}

/// Self-consistency of a block, independent of chain position:
/// merkle root, stored hash and proof of work under the declared difficulty.
pub fn check_block_integrity(block: &Block) -> std::result::Result<(), BlockError> {
    if block.header.merkle_root != compute_merkle_root(&block.transactions) {
        return Err(BlockError::MerkleMismatch);
    }
    if block.hash != block.compute_hash() {
        return Err(BlockError::HashMismatch);
    }
    if !ProofOfWork::new(block.header.difficulty).validate(&block.hash) {
        return Err(BlockError::InsufficientWork);
    }
    Ok(())
}

/// Build and mine the genesis block paying the initial reward to `miner`.
///
/// The timestamp comes from the config, so the result is deterministic for a
/// given config and miner address.
pub fn create_genesis_block(config: &GenesisConfig, miner: &str) -> Result<Block> {
    let coinbase = Transaction::coinbase(miner, config.initial_reward, 0, config.timestamp);
    let mut genesis = Block::with_timestamp(
        ZERO_HASH,
        vec![coinbase],
        config.initial_difficulty,
        0,
        miner,
        config.timestamp,
    );
    genesis.header.version = config.version;
    genesis.refresh_hash();

    let pow = ProofOfWork::new(config.initial_difficulty);
    let (nonce, hash) = pow.mine(&header_material(&genesis.header), 0, &AtomicBool::new(false))?;
    genesis.header.nonce = nonce;
    genesis.hash = hash;
    Ok(genesis)
}
