//! Block template assembly and nonce search

use crate::block::header_material;
use crate::chain::Blockchain;
use crate::error::Result;
use crate::pow::ProofOfWork;
use crate::transaction::current_timestamp;
use crate::types::*;
use crate::utxo::UtxoView;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Unmined candidate block plus the economics behind its coinbase
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    /// Subsidy at the template height
    pub reward: Amount,
    /// Sum of fees from the selected transactions
    pub fees: Amount,
}

impl Blockchain {
    /// CreateNewBlock: assemble a candidate on top of the current tip.
    ///
    /// Pool entries are taken in priority order and re-validated against a
    /// staged UTXO view; any that no longer connect are skipped. The coinbase
    /// pays `miner` the subsidy plus the fees actually collected.
    pub fn create_block_template(&self, miner: &str) -> BlockTemplate {
        let state = self.read_state();
        let height = state.next_height();
        let prev_hash = state.tip().map(|tip| tip.hash).unwrap_or(ZERO_HASH);
        // Keep timestamps monotonic even if the local clock lags the tip
        let timestamp = state
            .tip()
            .map(|tip| tip.header.timestamp.max(current_timestamp()))
            .unwrap_or_else(current_timestamp);

        let limit = self.config().max_tx_per_block.saturating_sub(1);
        let mut view = UtxoView::new(self.utxo_set(), height);
        let mut selected = Vec::new();
        let mut fees: Amount = 0;

        for entry in self.mempool().entries_for_block(usize::MAX) {
            if selected.len() >= limit {
                break;
            }
            match view.connect(&entry.tx) {
                Ok(fee) => {
                    fees = fees.saturating_add(fee);
                    selected.push(entry.tx);
                }
                Err(err) => {
                    debug!(tx = %hex::encode(entry.tx.hash), error = %err, "skipping pooled transaction");
                }
            }
        }

        let reward = state.rewards.block_reward(height);
        let coinbase = Transaction::coinbase(miner, reward.saturating_add(fees), height, timestamp);

        let mut transactions = Vec::with_capacity(selected.len() + 1);
        transactions.push(coinbase);
        transactions.extend(selected);

        let mut block = Block::with_timestamp(
            prev_hash,
            transactions,
            state.difficulty,
            height,
            miner,
            timestamp,
        );
        block.header.version = self.config().version;
        block.refresh_hash();

        BlockTemplate { block, reward, fees }
    }

    /// Build a template, mine it and submit the result
    pub fn mine_next_block(&self, miner: &Miner, address: &str) -> Result<Block> {
        let template = self.create_block_template(address);
        let block = miner.mine(template)?;
        self.add_block(block.clone())?;
        Ok(block)
    }
}

/// Nonce search over block templates, cancellable from another thread
#[derive(Debug, Clone)]
pub struct Miner {
    abort: Arc<AtomicBool>,
    max_nonce: u64,
}

impl Default for Miner {
    fn default() -> Self {
        Self::new()
    }
}

impl Miner {
    pub fn new() -> Self {
        Self {
            abort: Arc::new(AtomicBool::new(false)),
            max_nonce: u64::MAX,
        }
    }

    pub fn with_max_nonce(max_nonce: u64) -> Self {
        Self {
            max_nonce,
            ..Self::new()
        }
    }

    /// Shared flag; setting it makes any in-progress search return `MiningAborted`
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    /// Clear a previous abort so the miner can be reused
    pub fn reset(&self) {
        self.abort.store(false, Ordering::Relaxed);
    }

    /// MineBlock: search nonces until the block hash meets its declared difficulty
    pub fn mine(&self, template: BlockTemplate) -> Result<Block> {
        let mut block = template.block;
        let pow = ProofOfWork::with_max_nonce(block.header.difficulty, self.max_nonce);
        let (nonce, hash) = pow.mine(&header_material(&block.header), 0, &self.abort)?;

        block.header.nonce = nonce;
        block.hash = hash;
        info!(
            height = block.height(),
            nonce,
            txs = block.transaction_count(),
            reward = template.reward,
            fees = template.fees,
            "block mined"
        );
        Ok(block)
    }
}
