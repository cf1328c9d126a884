//! Persistence: failure without divergence, cold start and UTXO restore

use ledger_core::chain::UTXO_HEIGHT_STATE_KEY;
use ledger_core::storage::StorageResult;
use ledger_core::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// MemoryStorage that can be told to fail state writes, the last step of persisting a block
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    fail_state_writes: AtomicBool,
}

impl FlakyStorage {
    fn set_failing(&self, failing: bool) {
        self.fail_state_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.fail_state_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("disk full".to_string()));
        }
        Ok(())
    }
}

impl Storage for FlakyStorage {
    fn store_block(&self, block: &Block) -> StorageResult<()> {
        self.inner.store_block(block)
    }
    fn get_block(&self, height: u64) -> StorageResult<Option<Block>> {
        self.inner.get_block(height)
    }
    fn get_block_by_hash(&self, hash: &Hash) -> StorageResult<Option<Block>> {
        self.inner.get_block_by_hash(hash)
    }
    fn delete_block(&self, height: u64) -> StorageResult<()> {
        self.inner.delete_block(height)
    }
    fn store_utxo(&self, utxo: &Utxo) -> StorageResult<()> {
        self.inner.store_utxo(utxo)
    }
    fn get_utxo(&self, hash: &Hash, index: u32) -> StorageResult<Option<Utxo>> {
        self.inner.get_utxo(hash, index)
    }
    fn delete_utxo(&self, hash: &Hash, index: u32) -> StorageResult<()> {
        self.inner.delete_utxo(hash, index)
    }
    fn get_all_utxos(&self) -> StorageResult<Vec<Utxo>> {
        self.inner.get_all_utxos()
    }
    fn store_transaction(&self, tx: &Transaction) -> StorageResult<()> {
        self.inner.store_transaction(tx)
    }
    fn get_transaction(&self, hash: &Hash) -> StorageResult<Option<Transaction>> {
        self.inner.get_transaction(hash)
    }
    fn get_transactions_by_address(&self, address: &str) -> StorageResult<Vec<Transaction>> {
        self.inner.get_transactions_by_address(address)
    }
    fn store_state(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check()?;
        self.inner.store_state(key, value)
    }
    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get_state(key)
    }
    fn delete_state(&self, key: &str) -> StorageResult<()> {
        self.inner.delete_state(key)
    }
    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }
    fn backup(&self) -> StorageResult<()> {
        self.inner.backup()
    }
    fn stats(&self) -> StorageStats {
        self.inner.stats()
    }
}

fn spend_genesis(chain: &Blockchain, keys: &KeyPair, to: &str, value: Amount) -> Transaction {
    let genesis = chain.block_at(0).unwrap();
    let mut tx = Transaction::new(
        vec![TransactionInput::new(OutPoint::new(genesis.transactions[0].hash, 0))],
        vec![TransactionOutput {
            value,
            address: to.to_string(),
            lock_script: DEFAULT_LOCK_SCRIPT.to_string(),
        }],
    );
    tx.sign_all(keys).unwrap();
    tx
}

#[test]
fn test_storage_failure_leaves_state_untouched() {
    let alice = KeyPair::generate();
    let storage = Arc::new(FlakyStorage::default());
    let chain = Blockchain::open(NodeConfig::regtest(), storage.clone(), &alice.address()).unwrap();

    let tx = spend_genesis(&chain, &alice, "VDXbob", 1_000);
    chain.submit_transaction(tx.clone()).unwrap();
    let info_before = chain.chain_info();
    let utxos_before = chain.unspent_outputs(&alice.address());
    let stats_before = storage.stats();

    storage.set_failing(true);
    let result = chain.mine_next_block(&Miner::new(), "VDXminer");
    assert!(matches!(result, Err(ConsensusError::Storage(StorageError::Io(_)))));

    // Memory is unchanged
    assert_eq!(chain.chain_info(), info_before);
    assert_eq!(chain.unspent_outputs(&alice.address()), utxos_before);
    assert!(chain.mempool().contains(&tx.hash));

    // Partial writes were rolled back
    assert!(storage.get_block(1).unwrap().is_none());
    assert_eq!(storage.get_all_utxos().unwrap().len(), 1);
    assert_eq!(storage.stats().blocks, stats_before.blocks);
    assert_eq!(
        storage.get_state(UTXO_HEIGHT_STATE_KEY).unwrap(),
        Some(serde_json::to_vec(&1u64).unwrap())
    );

    // Recovery once storage is healthy again
    storage.set_failing(false);
    let block = chain.mine_next_block(&Miner::new(), "VDXminer").unwrap();
    assert_eq!(block.height(), 1);
    assert_eq!(chain.balance("VDXbob"), 1_000);
}

#[test]
fn test_cold_start_restores_chain() {
    let alice = KeyPair::generate();
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

    let (info, alice_balance, tip) = {
        let chain = Blockchain::open(NodeConfig::regtest(), storage.clone(), &alice.address()).unwrap();
        let tx = spend_genesis(&chain, &alice, "VDXbob", 7_000);
        chain.submit_transaction(tx).unwrap();
        let miner = Miner::new();
        for _ in 0..3 {
            chain.mine_next_block(&miner, &alice.address()).unwrap();
        }
        (chain.chain_info(), chain.balance(&alice.address()), chain.tip().unwrap())
    };

    // A different miner address must not produce a second genesis
    let reopened = Blockchain::open(NodeConfig::regtest(), storage, "VDXsomeoneelse").unwrap();
    let mut reopened_info = reopened.chain_info();
    assert_eq!(reopened_info.pending_txs, 0);
    reopened_info.pending_txs = info.pending_txs;
    assert_eq!(reopened_info, info);
    assert_eq!(reopened.balance(&alice.address()), alice_balance);
    assert_eq!(reopened.balance("VDXbob"), 7_000);
    assert_eq!(reopened.tip().unwrap(), tip);
    assert_eq!(reopened.balance("VDXsomeoneelse"), 0);

    reopened.mine_next_block(&Miner::new(), "VDXminer").unwrap();
    assert_eq!(reopened.len(), 5);
}

#[test]
fn test_cold_start_rebuilds_stale_utxo_records() {
    let alice = KeyPair::generate();
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

    let expected = {
        let chain = Blockchain::open(NodeConfig::regtest(), storage.clone(), &alice.address()).unwrap();
        let tx = spend_genesis(&chain, &alice, "VDXbob", 3_000);
        chain.submit_transaction(tx).unwrap();
        chain.mine_next_block(&Miner::new(), "VDXminer").unwrap();
        chain.chain_info()
    };

    // Wreck the persisted UTXO records and their marker
    for utxo in storage.get_all_utxos().unwrap() {
        storage.delete_utxo(&utxo.outpoint.hash, utxo.outpoint.index).unwrap();
    }
    storage.delete_state(UTXO_HEIGHT_STATE_KEY).unwrap();

    let reopened = Blockchain::open(NodeConfig::regtest(), storage, "VDXminer").unwrap();
    assert_eq!(reopened.chain_info().utxo_count, expected.utxo_count);
    assert_eq!(reopened.balance("VDXbob"), 3_000);
}

#[test]
fn test_cold_start_rejects_tampered_block() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    {
        let chain = Blockchain::open(NodeConfig::regtest(), storage.clone(), "VDXminer").unwrap();
        chain.mine_next_block(&Miner::new(), "VDXminer").unwrap();
    }

    let mut block = storage.get_block(1).unwrap().unwrap();
    block.transactions[0].outputs[0].value += 1;
    block.transactions[0].refresh_hash();
    storage.store_block(&block).unwrap();

    assert!(matches!(
        Blockchain::open(NodeConfig::regtest(), storage, "VDXminer"),
        Err(ConsensusError::InvalidBlock(BlockError::MerkleMismatch))
    ));
}

#[test]
fn test_accepted_blocks_are_persisted() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let chain = Blockchain::open(NodeConfig::regtest(), storage.clone(), "VDXminer").unwrap();
    let block = chain.mine_next_block(&Miner::new(), "VDXminer").unwrap();

    assert_eq!(storage.get_block(1).unwrap(), Some(block.clone()));
    assert_eq!(storage.get_block_by_hash(&block.hash).unwrap(), Some(block.clone()));
    assert_eq!(
        storage.get_transaction(&block.transactions[0].hash).unwrap(),
        Some(block.transactions[0].clone())
    );
    assert_eq!(storage.get_transactions_by_address("VDXminer").unwrap().len(), 2);
    assert_eq!(storage.get_all_utxos().unwrap().len(), chain.chain_info().utxo_count);
}

#[test]
fn test_closed_storage_fails_block_submission() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let chain = Blockchain::open(NodeConfig::regtest(), storage.clone(), "VDXminer").unwrap();
    storage.close().unwrap();

    assert!(matches!(
        chain.mine_next_block(&Miner::new(), "VDXminer"),
        Err(ConsensusError::Storage(StorageError::Closed))
    ));
    assert_eq!(chain.len(), 1);
}
