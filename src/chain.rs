//! Chain orchestration: block acceptance, persistence, queries and bootstrap

use crate::block::{check_block_integrity, create_genesis_block};
use crate::config::{GenesisConfig, NodeConfig};
use crate::difficulty::DifficultyAdjuster;
use crate::economic::RewardCalculator;
use crate::error::{BlockError, ConsensusError, Result, StorageError};
use crate::mempool::{ExpirySweeper, Mempool};
use crate::storage::{MemoryStorage, Storage};
use crate::transaction::calculate_fee;
use crate::types::*;
use crate::utxo::{UtxoDelta, UtxoSet, UtxoView};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State key recording the chain length the persisted UTXO records match
pub const UTXO_HEIGHT_STATE_KEY: &str = "utxo_height";

/// Snapshot of chain statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Number of blocks in the chain, genesis included. This is the height
    /// the next block will carry, one above [`Blockchain::tip_height`].
    pub height: u64,
    /// Same count as `height`, as a length
    pub blocks: usize,
    /// Difficulty the next block must declare
    pub difficulty: u32,
    /// Hex of the tip hash; empty for an empty chain
    pub last_block_hash: String,
    pub last_block_time: i64,
    /// Transactions across all blocks, coinbases included
    pub total_transactions: u64,
    pub pending_txs: usize,
    pub utxo_count: usize,
    /// Coins minted so far, fees excluded
    pub supply_mined: Amount,
    /// `supply_mined` as a percentage of max supply
    pub mined_percentage: f64,
    /// Blocks from the tip height to the next halving height
    pub blocks_until_halving: u64,
    /// Subsidy at the tip height, not the next block's
    pub current_reward: Amount,
}

/// Everything guarded by the chain lock
#[derive(Debug)]
pub(crate) struct ChainState {
    pub(crate) blocks: Vec<Block>,
    pub(crate) timestamps: Vec<i64>,
    pub(crate) difficulty: u32,
    pub(crate) rewards: RewardCalculator,
    block_index: HashMap<Hash, u64>,
    /// tx hash -> (block height, position in block)
    tx_index: HashMap<Hash, (u64, usize)>,
    total_transactions: u64,
}

impl ChainState {
    fn new(config: &GenesisConfig) -> Self {
        Self {
            blocks: Vec::new(),
            timestamps: Vec::new(),
            difficulty: config.initial_difficulty,
            rewards: RewardCalculator::from_config(config),
            block_index: HashMap::new(),
            tx_index: HashMap::new(),
            total_transactions: 0,
        }
    }

    pub(crate) fn next_height(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub(crate) fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Append an already validated block and advance difficulty and supply
    fn push(&mut self, block: Block, adjuster: &DifficultyAdjuster) {
        let height = block.height();
        let minted = minted_by(&block, &self.rewards);
        self.rewards.update_total_mined(minted);

        for (position, tx) in block.transactions.iter().enumerate() {
            self.tx_index.insert(tx.hash, (height, position));
        }
        self.total_transactions += block.transactions.len() as u64;
        self.block_index.insert(block.hash, height);
        self.timestamps.push(block.header.timestamp);
        self.blocks.push(block);

        if adjuster.should_adjust(height) {
            self.difficulty = adjuster.adjust(self.difficulty, &self.timestamps);
        }
    }
}

/// New coins a block mints: its coinbase total, capped at the subsidy owed at
/// its height. Anything above the subsidy is recycled fees.
fn minted_by(block: &Block, rewards: &RewardCalculator) -> Amount {
    let paid = block
        .coinbase()
        .and_then(|coinbase| coinbase.total_output().ok())
        .unwrap_or(0);
    paid.min(rewards.block_reward(block.height()))
}

/// Storage writes to reverse if persisting a block fails halfway
enum Undo {
    Block(u64),
    RemoveUtxo(OutPoint),
    RestoreUtxo(Utxo),
    State(Option<Vec<u8>>),
}

/// Outcome of validating a candidate block against the current tip
pub(crate) struct ConnectedBlock {
    pub(crate) delta: UtxoDelta,
    pub(crate) fees: Amount,
}

/// The ledger: owns the block sequence and live UTXO set, fronts the mempool
/// and storage collaborator.
///
/// Lock order is chain, then UTXO set, then mempool.
pub struct Blockchain {
    config: GenesisConfig,
    state: RwLock<ChainState>,
    utxos: UtxoSet,
    mempool: Arc<Mempool>,
    storage: Arc<dyn Storage>,
    adjuster: DifficultyAdjuster,
    _sweeper: Option<ExpirySweeper>,
}

impl Blockchain {
    /// Open a chain over `storage`.
    ///
    /// Empty storage gets a freshly mined genesis block paying `miner`.
    /// Otherwise blocks are loaded in height order, re-checked, and used to
    /// replay difficulty and minted supply; the UTXO set comes from the
    /// persisted records when they match the loaded chain, or is rebuilt.
    pub fn open(config: NodeConfig, storage: Arc<dyn Storage>, miner: &str) -> Result<Self> {
        config.genesis.validate()?;
        let mempool = Arc::new(Mempool::from_config(&config.mempool));
        let sweeper = (config.mempool.sweep_interval_secs > 0).then(|| {
            ExpirySweeper::spawn(Arc::clone(&mempool), config.mempool.sweep_interval())
        });

        let chain = Self {
            state: RwLock::new(ChainState::new(&config.genesis)),
            utxos: UtxoSet::new(),
            mempool,
            storage,
            adjuster: DifficultyAdjuster::new(
                config.genesis.difficulty_window,
                config.genesis.target_block_interval,
            ),
            config: config.genesis,
            _sweeper: sweeper,
        };

        if chain.storage.get_block(0)?.is_none() {
            let genesis = create_genesis_block(&chain.config, miner)?;
            info!(
                chain_id = %chain.config.chain_id,
                hash = %hex::encode(genesis.hash),
                "created genesis block"
            );
            chain.add_block(genesis)?;
        } else {
            chain.load_from_storage()?;
        }
        Ok(chain)
    }

    /// Chain backed by a fresh [`MemoryStorage`]
    pub fn in_memory(config: NodeConfig, miner: &str) -> Result<Self> {
        Self::open(config, Arc::new(MemoryStorage::new()), miner)
    }

    fn load_from_storage(&self) -> Result<()> {
        let mut state = self.state.write();
        let mut height = 0u64;

        while let Some(block) = self.storage.get_block(height)? {
            self.check_position(&state, &block)?;
            check_block_integrity(&block)?;
            if block.header.difficulty != state.difficulty {
                return Err(BlockError::DifficultyMismatch {
                    expected: state.difficulty,
                    got: block.header.difficulty,
                }
                .into());
            }
            state.push(block, &self.adjuster);
            height += 1;
        }

        let persisted_height = match self.storage.get_state(UTXO_HEIGHT_STATE_KEY)? {
            Some(bytes) => Some(
                serde_json::from_slice::<u64>(&bytes).map_err(StorageError::from)?,
            ),
            None => None,
        };

        if persisted_height == Some(height) {
            self.utxos
                .replace(UtxoSet::from_utxos(self.storage.get_all_utxos()?));
            debug!(count = self.utxos.count(), "restored persisted UTXO set");
        } else {
            self.utxos.replace(UtxoSet::rebuild(&state.blocks));
            warn!(
                persisted = ?persisted_height,
                blocks = height,
                count = self.utxos.count(),
                "persisted UTXO set stale, rebuilt from blocks"
            );
        }

        info!(
            blocks = height,
            difficulty = state.difficulty,
            supply_mined = state.rewards.total_mined(),
            "loaded chain from storage"
        );
        Ok(())
    }

    /// Validate and append a block.
    ///
    /// On any failure the chain, UTXO set and mempool are untouched. Storage
    /// writes happen before the in-memory commit; a storage failure rolls back
    /// whatever was written and surfaces as [`ConsensusError::Storage`].
    pub fn add_block(&self, block: Block) -> Result<()> {
        let mut state = self.state.write();

        let connected = match self.connect_block(&state, &block) {
            Ok(connected) => connected,
            Err(err) => {
                warn!(height = block.height(), hash = %hex::encode(block.hash), error = %err, "block rejected");
                return Err(err.into());
            }
        };

        self.persist_block(&block, &connected.delta)?;

        self.utxos.apply(&connected.delta);
        self.prune_mempool(&block);

        let height = block.height();
        let hash = block.hash;
        let tx_count = block.transaction_count();
        state.push(block, &self.adjuster);

        info!(
            height,
            hash = %hex::encode(hash),
            txs = tx_count,
            fees = connected.fees,
            utxos = self.utxos.count(),
            difficulty = state.difficulty,
            "block added"
        );
        Ok(())
    }

    fn check_position(&self, state: &ChainState, block: &Block) -> std::result::Result<(), BlockError> {
        let expected = state.next_height();
        if block.height() != expected {
            return Err(BlockError::HeightMismatch {
                expected,
                got: block.height(),
            });
        }
        match state.tip() {
            Some(tip) if block.header.prev_block_hash != tip.hash => Err(BlockError::PrevHashMismatch),
            None if !block.is_genesis() => Err(BlockError::NotGenesis),
            _ => Ok(()),
        }
    }

    /// Every acceptance rule, evaluated against a staged UTXO view
    pub(crate) fn connect_block(
        &self,
        state: &ChainState,
        block: &Block,
    ) -> std::result::Result<ConnectedBlock, BlockError> {
        self.check_position(state, block)?;

        let count = block.transactions.len();
        if count == 0 {
            return Err(BlockError::NoTransactions);
        }
        if count > self.config.max_tx_per_block {
            return Err(BlockError::TooManyTransactions {
                count,
                limit: self.config.max_tx_per_block,
            });
        }
        let coinbase = &block.transactions[0];
        if !coinbase.is_coinbase() {
            return Err(BlockError::FirstNotCoinbase);
        }
        if coinbase.lock_time != block.height() as i64 {
            return Err(BlockError::CoinbaseHeightMismatch {
                expected: block.height(),
                got: coinbase.lock_time,
            });
        }
        if let Some(index) = block.transactions.iter().skip(1).position(Transaction::is_coinbase) {
            return Err(BlockError::ExtraCoinbase { index: index + 1 });
        }

        let mut view = UtxoView::new(&self.utxos, block.height());
        let mut fees: Amount = 0;
        for (index, tx) in block.transactions.iter().enumerate() {
            let fee = view
                .connect(tx)
                .map_err(|source| BlockError::InvalidTransaction { index, source })?;
            fees = fees.saturating_add(fee);
        }

        if block.header.difficulty != state.difficulty {
            return Err(BlockError::DifficultyMismatch {
                expected: state.difficulty,
                got: block.header.difficulty,
            });
        }
        check_block_integrity(block)?;

        let allowed = state.rewards.coinbase_reward(block.height(), fees);
        let paid = coinbase
            .total_output()
            .map_err(|source| BlockError::InvalidTransaction { index: 0, source })?;
        if paid > allowed {
            return Err(BlockError::CoinbaseOverpay { paid, allowed });
        }

        Ok(ConnectedBlock {
            delta: view.into_delta(),
            fees,
        })
    }

    fn persist_block(&self, block: &Block, delta: &UtxoDelta) -> Result<()> {
        let mut journal = Vec::new();
        if let Err(err) = self.write_block(block, delta, &mut journal) {
            warn!(
                height = block.height(),
                error = %err,
                writes = journal.len(),
                "persisting block failed, rolling back"
            );
            self.rollback(journal);
            return Err(err.into());
        }
        Ok(())
    }

    fn write_block(
        &self,
        block: &Block,
        delta: &UtxoDelta,
        journal: &mut Vec<Undo>,
    ) -> std::result::Result<(), StorageError> {
        self.storage.store_block(block)?;
        journal.push(Undo::Block(block.height()));

        for tx in &block.transactions {
            self.storage.store_transaction(tx)?;
        }
        for utxo in &delta.spent {
            self.storage.delete_utxo(&utxo.outpoint.hash, utxo.outpoint.index)?;
            journal.push(Undo::RestoreUtxo(utxo.clone()));
        }
        for utxo in &delta.created {
            self.storage.store_utxo(utxo)?;
            journal.push(Undo::RemoveUtxo(utxo.outpoint));
        }

        let previous = self.storage.get_state(UTXO_HEIGHT_STATE_KEY)?;
        let height = serde_json::to_vec(&(block.height() + 1))?;
        self.storage.store_state(UTXO_HEIGHT_STATE_KEY, &height)?;
        journal.push(Undo::State(previous));
        Ok(())
    }

    /// Best effort: failures are logged and the remaining entries still run
    fn rollback(&self, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            let result = match &undo {
                Undo::Block(height) => self.storage.delete_block(*height),
                Undo::RemoveUtxo(outpoint) => self.storage.delete_utxo(&outpoint.hash, outpoint.index),
                Undo::RestoreUtxo(utxo) => self.storage.store_utxo(utxo),
                Undo::State(Some(previous)) => self.storage.store_state(UTXO_HEIGHT_STATE_KEY, previous),
                Undo::State(None) => self.storage.delete_state(UTXO_HEIGHT_STATE_KEY),
            };
            if let Err(err) = result {
                warn!(error = %err, "storage rollback step failed");
            }
        }
    }

    /// Drop included transactions and any pooled transaction that spent an
    /// outpoint the block consumed
    fn prune_mempool(&self, block: &Block) {
        let mut stale: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash).collect();
        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in &tx.inputs {
                if let Some(spender) = self.mempool.spender_of(&input.prevout) {
                    stale.push(spender);
                }
            }
        }
        let removed = self.mempool.remove_many(&stale);
        if removed > 0 {
            debug!(removed, "pruned mempool after block");
        }
    }

    /// Validate a transaction against the live UTXO set and pool it.
    /// Returns the fee it pays.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Amount> {
        let state = self.state.read();
        if state.tx_index.contains_key(&tx.hash) {
            return Err(ConsensusError::DuplicateTransaction(hex::encode(tx.hash)));
        }

        let view = UtxoView::new(&self.utxos, state.next_height());
        let total_input = view.check_inputs(&tx)?;
        let fee = calculate_fee(total_input, &tx)?;

        self.mempool.add(tx, fee)?;
        Ok(fee)
    }

    /// Pool a transaction with a caller-declared fee, without validation.
    /// Block assembly re-validates everything it selects.
    pub fn add_pending_transaction(&self, tx: Transaction, fee: Amount) -> Result<()> {
        self.mempool.add(tx, fee)
    }

    pub fn pending_transactions(&self, limit: usize) -> Vec<Transaction> {
        self.mempool.select_for_block(limit)
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn config(&self) -> &GenesisConfig {
        &self.config
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read()
    }

    pub(crate) fn utxo_set(&self) -> &UtxoSet {
        &self.utxos
    }

    pub fn tip(&self) -> Option<Block> {
        self.state.read().tip().cloned()
    }

    /// Height of the tip block. [`ChainInfo::height`] is the block count,
    /// one more than this.
    pub fn tip_height(&self) -> u64 {
        self.state.read().next_height().saturating_sub(1)
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.state.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().blocks.is_empty()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        self.state.read().blocks.get(height as usize).cloned()
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        let state = self.state.read();
        let height = *state.block_index.get(hash)?;
        state.blocks.get(height as usize).cloned()
    }

    /// A mined transaction and the height of the block holding it
    pub fn transaction(&self, hash: &Hash) -> Option<(Transaction, u64)> {
        let state = self.state.read();
        let (height, position) = *state.tx_index.get(hash)?;
        let tx = state.blocks.get(height as usize)?.transactions.get(position)?;
        Some((tx.clone(), height))
    }

    pub fn balance(&self, address: &str) -> Amount {
        let _state = self.state.read();
        self.utxos.balance(address)
    }

    pub fn unspent_outputs(&self, address: &str) -> Vec<Utxo> {
        let _state = self.state.read();
        self.utxos.find_by_address(address)
    }

    pub fn find_utxo(&self, hash: &Hash, index: u32) -> Option<Utxo> {
        let _state = self.state.read();
        self.utxos.find(hash, index)
    }

    /// Difficulty the next block must declare
    pub fn difficulty(&self) -> u32 {
        self.state.read().difficulty
    }

    pub fn total_mined(&self) -> Amount {
        self.state.read().rewards.total_mined()
    }

    /// Subsidy owed to the next block
    pub fn next_block_reward(&self) -> Amount {
        let state = self.state.read();
        state.rewards.block_reward(state.next_height())
    }

    pub fn chain_info(&self) -> ChainInfo {
        let state = self.state.read();
        let (last_block_hash, last_block_time, tip_height) = match state.tip() {
            Some(tip) => (hex::encode(tip.hash), tip.header.timestamp, tip.height()),
            None => (String::new(), 0, 0),
        };

        ChainInfo {
            height: state.next_height(),
            blocks: state.blocks.len(),
            difficulty: state.difficulty,
            last_block_hash,
            last_block_time,
            total_transactions: state.total_transactions,
            pending_txs: self.mempool.len(),
            utxo_count: self.utxos.count(),
            supply_mined: state.rewards.total_mined(),
            mined_percentage: state.rewards.mined_percentage(),
            blocks_until_halving: state.rewards.blocks_until_halving(tip_height),
            current_reward: state.rewards.block_reward(tip_height),
        }
    }
}
