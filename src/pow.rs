//! Proof of work: targets, nonce search and hash checks
//!
//! A difficulty `d` maps to the target `2^(256 - d)`; a block hash, read as a
//! big-endian 256-bit integer, qualifies when it is strictly below the target.
//! Difficulty 0 therefore admits every hash and each extra unit halves the
//! qualifying space.

use crate::constants::MINING_REPORT_INTERVAL;
use crate::crypto::double_sha256;
use crate::error::{ConsensusError, Result};
use crate::types::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Attempts between abort-flag checks
const ABORT_CHECK_INTERVAL: u64 = 1024;

/// PoW engine bound to a single difficulty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: u32,
    /// `None` when the target is 2^256, i.e. unbounded
    target: Option<U256>,
    max_nonce: u64,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        Self::with_max_nonce(difficulty, u64::MAX)
    }

    /// Engine whose search stops after `max_nonce`
    pub fn with_max_nonce(difficulty: u32, max_nonce: u64) -> Self {
        Self {
            difficulty,
            target: target_for_difficulty(difficulty),
            max_nonce,
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Target as big-endian bytes; `None` means every hash qualifies
    pub fn target_bytes(&self) -> Option<[u8; 32]> {
        self.target.as_ref().map(U256::to_be_bytes)
    }

    /// Work factor relative to the easiest target: `2^256 / target`.
    ///
    /// Equals `2^difficulty`; infinite once the target is zero.
    pub fn work_ratio(&self) -> f64 {
        match self.difficulty {
            0 => 1.0,
            d if d > 256 => f64::INFINITY,
            d => 2f64.powi(d as i32),
        }
    }

    /// CheckProofOfWork: ℍ → {true, false}
    ///
    /// hash < target
    pub fn validate(&self, hash: &Hash) -> bool {
        match &self.target {
            None => true,
            Some(target) => U256::from_be_bytes(hash) < *target,
        }
    }

    /// Search nonces upward from `start_nonce`, hashing `header_material ‖ nonce`
    /// with double SHA-256, until one meets the target.
    ///
    /// Returns the winning nonce and hash. Fails with `NonceSpaceExhausted`
    /// once `max_nonce` has been tried, or `MiningAborted` when `abort` is set.
    pub fn mine(
        &self,
        header_material: &[u8],
        start_nonce: u64,
        abort: &AtomicBool,
    ) -> Result<(u64, Hash)> {
        let prefix_len = header_material.len();
        let mut data = Vec::with_capacity(prefix_len + 8);
        data.extend_from_slice(header_material);
        data.extend_from_slice(&[0u8; 8]);

        let started = Instant::now();
        let mut attempts: u64 = 0;
        let mut nonce = start_nonce;

        while nonce <= self.max_nonce {
            if attempts % ABORT_CHECK_INTERVAL == 0 && abort.load(Ordering::Relaxed) {
                debug!(nonce, attempts, "mining aborted");
                return Err(ConsensusError::MiningAborted);
            }

            data[prefix_len..].copy_from_slice(&nonce.to_le_bytes());
            let hash = double_sha256(&data);
            attempts += 1;

            if self.validate(&hash) {
                info!(
                    nonce,
                    attempts,
                    hash = %hex::encode(hash),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "mining succeeded"
                );
                return Ok((nonce, hash));
            }

            if attempts % MINING_REPORT_INTERVAL == 0 {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    debug!(nonce, attempts, hash_rate = attempts as f64 / elapsed, "mining progress");
                }
            }

            if nonce == self.max_nonce {
                break;
            }
            nonce += 1;
        }

        Err(ConsensusError::NonceSpaceExhausted {
            start: start_nonce,
            end: self.max_nonce,
        })
    }
}

/// `1 << (256 - difficulty)`; `None` for difficulty 0, zero above 256
pub fn target_for_difficulty(difficulty: u32) -> Option<U256> {
    match difficulty {
        0 => None,
        d if d > 256 => Some(U256::zero()),
        d => Some(U256::one().shl(256 - d)),
    }
}

/// 256-bit unsigned integer for target comparisons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct U256([u64; 4]); // little-endian words

impl U256 {
    pub fn zero() -> Self {
        U256([0; 4])
    }

    pub fn one() -> Self {
        U256([1, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    pub fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }

        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }

        result
    }

    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let start = 32 - (i + 1) * 8;
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[start..start + 8]);
            *word = u64::from_be_bytes(chunk);
        }
        U256(words)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.0.iter().enumerate() {
            let start = 32 - (i + 1) * 8;
            bytes[start..start + 8].copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                std::cmp::Ordering::Equal => continue,
                other => return other,
            }
        }
        std::cmp::Ordering::Equal
    }
}
