//! Persistence collaborator and an in-memory JSON-backed implementation
//!
//! Records live under string keys: `block:{height}`, `blockhash:{hex}`
//! (height index), `utxo:{hex}:{index}`, `tx:{hex}` and `state:{key}`.
//! Values are serde_json encodings of the ledger types.

use crate::error::StorageError;
use crate::types::*;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable store for blocks, UTXOs, transactions and opaque state.
///
/// Missing records are `Ok(None)`; `Err` is reserved for genuine failures.
/// Calls are synchronous and never retried by the ledger.
pub trait Storage: Send + Sync {
    fn store_block(&self, block: &Block) -> StorageResult<()>;
    fn get_block(&self, height: u64) -> StorageResult<Option<Block>>;
    fn get_block_by_hash(&self, hash: &Hash) -> StorageResult<Option<Block>>;
    fn delete_block(&self, height: u64) -> StorageResult<()>;

    fn store_utxo(&self, utxo: &Utxo) -> StorageResult<()>;
    fn get_utxo(&self, hash: &Hash, index: u32) -> StorageResult<Option<Utxo>>;
    fn delete_utxo(&self, hash: &Hash, index: u32) -> StorageResult<()>;
    fn get_all_utxos(&self) -> StorageResult<Vec<Utxo>>;

    fn store_transaction(&self, tx: &Transaction) -> StorageResult<()>;
    fn get_transaction(&self, hash: &Hash) -> StorageResult<Option<Transaction>>;
    /// Transactions with at least one output paying `address`
    fn get_transactions_by_address(&self, address: &str) -> StorageResult<Vec<Transaction>>;

    fn store_state(&self, key: &str, value: &[u8]) -> StorageResult<()>;
    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    fn delete_state(&self, key: &str) -> StorageResult<()>;

    fn close(&self) -> StorageResult<()>;
    fn backup(&self) -> StorageResult<()>;
    fn stats(&self) -> StorageStats;
}

/// Record counts reported by [`Storage::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub blocks: usize,
    pub utxos: usize,
    pub transactions: usize,
    pub state_entries: usize,
    pub total_bytes: usize,
    pub backups: u64,
    pub closed: bool,
}

fn block_key(height: u64) -> String {
    format!("block:{}", height)
}

fn block_hash_key(hash: &Hash) -> String {
    format!("blockhash:{}", hex::encode(hash))
}

fn utxo_key(hash: &Hash, index: u32) -> String {
    format!("utxo:{}:{}", hex::encode(hash), index)
}

fn tx_key(hash: &Hash) -> String {
    format!("tx:{}", hex::encode(hash))
}

fn state_key(key: &str) -> String {
    format!("state:{}", key)
}

/// Thread-safe key/value store held in memory.
///
/// `backup` writes the whole keyspace as JSON to the configured backup path;
/// without one it only counts the request.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    closed: AtomicBool,
    backup_path: Option<PathBuf>,
    backups: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backup_path(path: impl Into<PathBuf>) -> Self {
        Self {
            backup_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Load a keyspace previously written by [`Storage::backup`]
    pub fn restore(path: &Path) -> StorageResult<Self> {
        let data = fs::read(path).map_err(|e| StorageError::Io(e.to_string()))?;
        let records: BTreeMap<String, Vec<u8>> = serde_json::from_slice(&data)?;
        Ok(Self {
            records: RwLock::new(records),
            backup_path: Some(path.to_path_buf()),
            ..Self::default()
        })
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn put<T: Serialize>(&self, key: String, value: &T) -> StorageResult<()> {
        self.ensure_open()?;
        let bytes = serde_json::to_vec(value)?;
        self.records.write().insert(key, bytes);
        Ok(())
    }

    fn fetch<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        self.ensure_open()?;
        match self.records.read().get(key) {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.ensure_open()?;
        self.records.write().remove(key);
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> StorageResult<Vec<T>> {
        self.ensure_open()?;
        self.records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, bytes)| serde_json::from_slice(bytes).map_err(StorageError::from))
            .collect()
    }

    fn count_prefix(records: &BTreeMap<String, Vec<u8>>, prefix: &str) -> usize {
        records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .count()
    }
}

impl Storage for MemoryStorage {
    fn store_block(&self, block: &Block) -> StorageResult<()> {
        self.put(block_key(block.height()), block)?;
        self.put(block_hash_key(&block.hash), &block.height())
    }

    fn get_block(&self, height: u64) -> StorageResult<Option<Block>> {
        self.fetch(&block_key(height))
    }

    fn get_block_by_hash(&self, hash: &Hash) -> StorageResult<Option<Block>> {
        match self.fetch::<u64>(&block_hash_key(hash))? {
            Some(height) => self.get_block(height),
            None => Ok(None),
        }
    }

    fn delete_block(&self, height: u64) -> StorageResult<()> {
        if let Some(block) = self.get_block(height)? {
            self.delete(&block_hash_key(&block.hash))?;
        }
        self.delete(&block_key(height))
    }

    fn store_utxo(&self, utxo: &Utxo) -> StorageResult<()> {
        self.put(utxo_key(&utxo.outpoint.hash, utxo.outpoint.index), utxo)
    }

    fn get_utxo(&self, hash: &Hash, index: u32) -> StorageResult<Option<Utxo>> {
        self.fetch(&utxo_key(hash, index))
    }

    fn delete_utxo(&self, hash: &Hash, index: u32) -> StorageResult<()> {
        self.delete(&utxo_key(hash, index))
    }

    fn get_all_utxos(&self) -> StorageResult<Vec<Utxo>> {
        self.scan("utxo:")
    }

    fn store_transaction(&self, tx: &Transaction) -> StorageResult<()> {
        self.put(tx_key(&tx.hash), tx)
    }

    fn get_transaction(&self, hash: &Hash) -> StorageResult<Option<Transaction>> {
        self.fetch(&tx_key(hash))
    }

    fn get_transactions_by_address(&self, address: &str) -> StorageResult<Vec<Transaction>> {
        let all: Vec<Transaction> = self.scan("tx:")?;
        Ok(all
            .into_iter()
            .filter(|tx| tx.outputs.iter().any(|output| output.address == address))
            .collect())
    }

    fn store_state(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        self.records.write().insert(state_key(key), value.to_vec());
        Ok(())
    }

    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.records.read().get(&state_key(key)).cloned())
    }

    fn delete_state(&self, key: &str) -> StorageResult<()> {
        self.delete(&state_key(key))
    }

    fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn backup(&self) -> StorageResult<()> {
        self.ensure_open()?;
        if let Some(path) = &self.backup_path {
            let data = serde_json::to_vec(&*self.records.read())?;
            fs::write(path, data).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        self.backups.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        let records = self.records.read();
        StorageStats {
            blocks: Self::count_prefix(&records, "block:"),
            utxos: Self::count_prefix(&records, "utxo:"),
            transactions: Self::count_prefix(&records, "tx:"),
            state_entries: Self::count_prefix(&records, "state:"),
            total_bytes: records.iter().map(|(k, v)| k.len() + v.len()).sum(),
            backups: self.backups.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Acquire),
        }
    }
}
