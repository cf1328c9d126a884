//! Pool of unconfirmed transactions awaiting inclusion in a block

use crate::config::MempoolConfig;
use crate::error::{ConsensusError, Result, TxError};
use crate::types::*;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A pooled transaction with its admission metadata
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub fee: Amount,
    /// fee / (input count + output count)
    pub priority: u64,
    pub added_at: Instant,
    seq: u64,
}

impl MempoolEntry {
    fn new(tx: Transaction, fee: Amount, seq: u64) -> Self {
        let elements = (tx.inputs.len() + tx.outputs.len()).max(1) as u64;
        Self {
            priority: fee / elements,
            tx,
            fee,
            added_at: Instant::now(),
            seq,
        }
    }

    /// Selection order: highest priority, then earliest arrival, then hash
    fn sort_key(&self) -> SortKey {
        (Reverse(self.priority), self.seq, self.tx.hash)
    }
}

type SortKey = (Reverse<u64>, u64, Hash);

#[derive(Debug, Default)]
struct PoolInner {
    entries: HashMap<Hash, MempoolEntry>,
    by_priority: BTreeSet<SortKey>,
    /// Outpoint -> hash of the pooled transaction spending it
    spent: HashMap<OutPoint, Hash>,
    next_seq: u64,
}

impl PoolInner {
    fn remove(&mut self, hash: &Hash) -> Option<MempoolEntry> {
        let entry = self.entries.remove(hash)?;
        self.by_priority.remove(&entry.sort_key());
        for input in &entry.tx.inputs {
            if self.spent.get(&input.prevout) == Some(hash) {
                self.spent.remove(&input.prevout);
            }
        }
        Some(entry)
    }
}

/// Bounded transaction pool. All mutations, including expiry, serialize on one lock.
#[derive(Debug)]
pub struct Mempool {
    inner: RwLock<PoolInner>,
    max_size: usize,
    max_age: Duration,
}

impl Mempool {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self {
            inner: RwLock::new(PoolInner::default()),
            max_size,
            max_age,
        }
    }

    pub fn from_config(config: &MempoolConfig) -> Self {
        Self::new(config.max_size, config.max_age())
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Admit `tx` with its declared fee.
    ///
    /// Rejects when the pool is full, when the hash is already pooled, or when
    /// an input spends an outpoint another pooled transaction already spends.
    pub fn add(&self, tx: Transaction, fee: Amount) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.entries.len() >= self.max_size {
            return Err(ConsensusError::MempoolFull {
                capacity: self.max_size,
            });
        }
        if inner.entries.contains_key(&tx.hash) {
            return Err(ConsensusError::DuplicateTransaction(hex::encode(tx.hash)));
        }
        if let Some(index) = tx
            .inputs
            .iter()
            .position(|input| inner.spent.contains_key(&input.prevout))
        {
            return Err(TxError::ConflictsWithPool { index }.into());
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = MempoolEntry::new(tx, fee, seq);
        let hash = entry.tx.hash;

        for input in &entry.tx.inputs {
            inner.spent.insert(input.prevout, hash);
        }
        inner.by_priority.insert(entry.sort_key());
        debug!(tx = %hex::encode(hash), fee, priority = entry.priority, "transaction pooled");
        inner.entries.insert(hash, entry);
        Ok(())
    }

    /// Remove by hash. Removing an absent hash is a no-op.
    pub fn remove(&self, hash: &Hash) -> Option<Transaction> {
        self.inner.write().remove(hash).map(|entry| entry.tx)
    }

    /// Remove every listed hash under a single lock acquisition
    pub fn remove_many<'a>(&self, hashes: impl IntoIterator<Item = &'a Hash>) -> usize {
        let mut inner = self.inner.write();
        hashes
            .into_iter()
            .filter(|hash| inner.remove(hash).is_some())
            .count()
    }

    pub fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.inner.read().entries.get(hash).map(|entry| entry.tx.clone())
    }

    pub fn entry(&self, hash: &Hash) -> Option<MempoolEntry> {
        self.inner.read().entries.get(hash).cloned()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().entries.contains_key(hash)
    }

    /// Hash of the pooled transaction spending `outpoint`, if any
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash> {
        self.inner.read().spent.get(outpoint).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Up to `limit` transactions in descending priority
    pub fn select_for_block(&self, limit: usize) -> Vec<Transaction> {
        self.entries_for_block(limit)
            .into_iter()
            .map(|entry| entry.tx)
            .collect()
    }

    /// Up to `limit` entries, fee included, in descending priority
    pub fn entries_for_block(&self, limit: usize) -> Vec<MempoolEntry> {
        let inner = self.inner.read();
        inner
            .by_priority
            .iter()
            .take(limit)
            .filter_map(|(_, _, hash)| inner.entries.get(hash).cloned())
            .collect()
    }

    /// Every pooled transaction in descending priority
    pub fn transactions(&self) -> Vec<Transaction> {
        self.select_for_block(usize::MAX)
    }

    /// Drop entries older than the configured max age. Returns how many went.
    pub fn remove_expired(&self) -> usize {
        self.remove_older_than(self.max_age)
    }

    pub fn remove_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let expired: Vec<Hash> = inner
            .entries
            .values()
            .filter(|entry| now.saturating_duration_since(entry.added_at) > max_age)
            .map(|entry| entry.tx.hash)
            .collect();
        for hash in &expired {
            inner.remove(hash);
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), remaining = inner.entries.len(), "mempool sweep");
        }
        expired.len()
    }

    pub fn clear(&self) {
        *self.inner.write() = PoolInner::default();
    }
}

/// Background thread that periodically calls [`Mempool::remove_expired`].
///
/// Stops when [`ExpirySweeper::shutdown`] is called or the handle is dropped;
/// both join the thread.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub fn spawn(mempool: Arc<Mempool>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("mempool-sweeper".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        mempool.remove_expired();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "failed to start mempool sweeper");
                None
            }
        };

        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn shutdown(&mut self) {
        if let Some(sender) = self.shutdown.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("mempool sweeper panicked");
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_LOCK_SCRIPT;

    fn tx(seed: u8, outputs: usize) -> Transaction {
        Transaction::with_timestamp(
            vec![TransactionInput::new(OutPoint::new([seed; 32], 0))],
            (0..outputs)
                .map(|i| TransactionOutput {
                    value: 100 + i as u64,
                    address: "VDXbob".to_string(),
                    lock_script: DEFAULT_LOCK_SCRIPT.to_string(),
                })
                .collect(),
            1_700_000_000,
        )
    }

    #[test]
    fn test_add_and_get() {
        let pool = Mempool::new(10, Duration::from_secs(60));
        let t = tx(1, 1);
        pool.add(t.clone(), 50).unwrap();

        assert!(pool.contains(&t.hash));
        assert_eq!(pool.get(&t.hash), Some(t.clone()));
        assert_eq!(pool.entry(&t.hash).unwrap().priority, 25);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let pool = Mempool::new(2, Duration::from_secs(60));
        pool.add(tx(1, 1), 1).unwrap();
        pool.add(tx(2, 1), 1).unwrap();
        assert!(matches!(
            pool.add(tx(3, 1), 1),
            Err(ConsensusError::MempoolFull { capacity: 2 })
        ));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_duplicate() {
        let pool = Mempool::new(10, Duration::from_secs(60));
        pool.add(tx(1, 1), 1).unwrap();
        assert!(matches!(
            pool.add(tx(1, 1), 1),
            Err(ConsensusError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_conflicting_spend_rejected() {
        let pool = Mempool::new(10, Duration::from_secs(60));
        pool.add(tx(1, 1), 1).unwrap();
        // Same outpoint, different outputs, so a different hash
        assert!(matches!(
            pool.add(tx(1, 2), 1),
            Err(ConsensusError::InvalidTransaction(TxError::ConflictsWithPool { index: 0 }))
        ));
    }

    #[test]
    fn test_remove_releases_outpoints() {
        let pool = Mempool::new(10, Duration::from_secs(60));
        let t = tx(1, 1);
        pool.add(t.clone(), 1).unwrap();
        assert!(pool.remove(&t.hash).is_some());
        assert!(pool.remove(&t.hash).is_none());
        assert!(pool.spender_of(&OutPoint::new([1; 32], 0)).is_none());
        pool.add(tx(1, 2), 1).unwrap();
    }

    #[test]
    fn test_select_orders_by_priority_then_arrival() {
        let pool = Mempool::new(10, Duration::from_secs(60));
        let low = tx(1, 1);
        let high = tx(2, 1);
        let tie_first = tx(3, 1);
        let tie_second = tx(4, 1);
        pool.add(low.clone(), 10).unwrap();
        pool.add(tie_first.clone(), 100).unwrap();
        pool.add(high.clone(), 1000).unwrap();
        pool.add(tie_second.clone(), 100).unwrap();

        let hashes: Vec<Hash> = pool.select_for_block(10).iter().map(|t| t.hash).collect();
        assert_eq!(hashes, vec![high.hash, tie_first.hash, tie_second.hash, low.hash]);

        assert_eq!(pool.select_for_block(2).len(), 2);
    }

    #[test]
    fn test_remove_expired() {
        let pool = Mempool::new(10, Duration::from_millis(1));
        pool.add(tx(1, 1), 1).unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(pool.remove_expired(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_fresh_entries_survive_sweep() {
        let pool = Mempool::new(10, Duration::from_secs(3600));
        pool.add(tx(1, 1), 1).unwrap();
        assert_eq!(pool.remove_expired(), 0);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_sweeper_runs_and_shuts_down() {
        let pool = Arc::new(Mempool::new(10, Duration::from_millis(1)));
        pool.add(tx(1, 1), 1).unwrap();

        let mut sweeper = ExpirySweeper::spawn(Arc::clone(&pool), Duration::from_millis(5));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !pool.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(pool.is_empty());

        sweeper.shutdown();
        assert!(!sweeper.is_running());
    }
}
