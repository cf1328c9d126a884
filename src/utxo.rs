//! Unspent output set, block deltas and validation views

use crate::error::TxError;
use crate::transaction::{calculate_fee, check_transaction, verify_input};
use crate::types::*;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Authoritative map of spendable outputs, guarded by its own reader/writer lock
#[derive(Debug, Default)]
pub struct UtxoSet {
    utxos: RwLock<HashMap<OutPoint, Utxo>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_utxos(utxos: impl IntoIterator<Item = Utxo>) -> Self {
        let map = utxos.into_iter().map(|u| (u.outpoint, u)).collect();
        Self {
            utxos: RwLock::new(map),
        }
    }

    /// Insert, overwriting any entry with the same outpoint
    pub fn add(&self, utxo: Utxo) {
        self.utxos.write().insert(utxo.outpoint, utxo);
    }

    /// Delete by key. Removing an absent key is a no-op.
    pub fn remove(&self, hash: &Hash, index: u32) -> Option<Utxo> {
        self.utxos.write().remove(&OutPoint::new(*hash, index))
    }

    pub fn find(&self, hash: &Hash, index: u32) -> Option<Utxo> {
        self.get(&OutPoint::new(*hash, index))
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.read().get(outpoint).cloned()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.read().contains_key(outpoint)
    }

    /// All entries owned by `address` (linear scan)
    pub fn find_by_address(&self, address: &str) -> Vec<Utxo> {
        self.utxos
            .read()
            .values()
            .filter(|utxo| utxo.address == address)
            .cloned()
            .collect()
    }

    pub fn balance(&self, address: &str) -> Amount {
        self.find_by_address(address)
            .iter()
            .fold(0u64, |acc, utxo| acc.saturating_add(utxo.value))
    }

    pub fn count(&self) -> usize {
        self.utxos.read().len()
    }

    /// Every live entry, sorted by outpoint
    pub fn snapshot(&self) -> Vec<Utxo> {
        let mut all: Vec<Utxo> = self.utxos.read().values().cloned().collect();
        all.sort_by(|a, b| a.outpoint.cmp(&b.outpoint));
        all
    }

    /// Apply a block delta: drop spent entries, insert created ones
    pub fn apply(&self, delta: &UtxoDelta) {
        let mut utxos = self.utxos.write();
        for utxo in &delta.spent {
            utxos.remove(&utxo.outpoint);
        }
        for utxo in &delta.created {
            utxos.insert(utxo.outpoint, utxo.clone());
        }
    }

    /// Reverse [`UtxoSet::apply`]: drop created entries, restore spent ones
    pub fn undo(&self, delta: &UtxoDelta) {
        let mut utxos = self.utxos.write();
        for utxo in &delta.created {
            utxos.remove(&utxo.outpoint);
        }
        for utxo in &delta.spent {
            utxos.insert(utxo.outpoint, utxo.clone());
        }
    }

    /// Replace the contents wholesale
    pub fn replace(&self, other: UtxoSet) {
        *self.utxos.write() = other.utxos.into_inner();
    }

    /// Reconstruct from scratch by replaying every block in chain order:
    /// add each transaction's outputs, then remove each referenced input.
    pub fn rebuild(blocks: &[Block]) -> Self {
        let set = UtxoSet::new();
        {
            let mut utxos = set.utxos.write();
            for block in blocks {
                for tx in &block.transactions {
                    for (index, output) in tx.outputs.iter().enumerate() {
                        let utxo = Utxo::from_output(tx.hash, index as u32, output, block.height());
                        utxos.insert(utxo.outpoint, utxo);
                    }
                    if tx.is_coinbase() {
                        continue;
                    }
                    for input in &tx.inputs {
                        utxos.remove(&input.prevout);
                    }
                }
            }
        }
        set
    }
}

impl Utxo {
    pub fn from_output(hash: Hash, index: u32, output: &TransactionOutput, height: u64) -> Self {
        Utxo {
            outpoint: OutPoint::new(hash, index),
            value: output.value,
            address: output.address.clone(),
            lock_script: output.lock_script.clone(),
            height,
        }
    }
}

/// Net UTXO change of one block: outputs it created that are still unspent
/// and pre-existing entries it consumed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoDelta {
    pub created: Vec<Utxo>,
    pub spent: Vec<Utxo>,
}

/// Lookup of spendable outputs
pub trait UtxoSource {
    fn lookup(&self, outpoint: &OutPoint) -> Option<Utxo>;
}

impl UtxoSource for UtxoSet {
    fn lookup(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.get(outpoint)
    }
}

/// Staged view over a [`UtxoSet`] used while validating a block.
///
/// Transactions connect in order; outputs created earlier in the block are
/// spendable and an outpoint can be spent at most once. Nothing touches the
/// underlying set until the resulting [`UtxoDelta`] is applied.
pub struct UtxoView<'a> {
    base: &'a dyn UtxoSource,
    height: u64,
    created: BTreeMap<OutPoint, Utxo>,
    spent: BTreeMap<OutPoint, Utxo>,
}

impl<'a> UtxoView<'a> {
    pub fn new(base: &'a dyn UtxoSource, height: u64) -> Self {
        Self {
            base,
            height,
            created: BTreeMap::new(),
            spent: BTreeMap::new(),
        }
    }

    /// Connect one transaction, returning its fee (zero for coinbase).
    ///
    /// Outputs may not land on an outpoint that is still unspent, so applying
    /// the resulting delta never overwrites a live entry.
    pub fn connect(&mut self, tx: &Transaction) -> Result<Amount, TxError> {
        if let Some(index) = (0..tx.outputs.len())
            .position(|index| self.resolve(&OutPoint::new(tx.hash, index as u32)).is_some())
        {
            return Err(TxError::DuplicateOutput { index });
        }

        let fee = if tx.is_coinbase() {
            check_transaction(tx)?;
            0
        } else {
            let total_input = self.check_inputs(tx)?;
            let fee = calculate_fee(total_input, tx)?;
            for input in &tx.inputs {
                self.spend(&input.prevout);
            }
            fee
        };

        for (index, output) in tx.outputs.iter().enumerate() {
            let utxo = Utxo::from_output(tx.hash, index as u32, output, self.height);
            self.created.insert(utxo.outpoint, utxo);
        }
        Ok(fee)
    }

    /// Structure, resolution, authorization and value checks for a
    /// non-coinbase transaction. Returns the resolved input total.
    pub fn check_inputs(&self, tx: &Transaction) -> Result<Amount, TxError> {
        check_transaction(tx)?;
        if tx.is_coinbase() {
            return Err(TxError::UnexpectedCoinbase);
        }

        let mut seen = Vec::with_capacity(tx.inputs.len());
        let mut total_input: Amount = 0;
        for (index, input) in tx.inputs.iter().enumerate() {
            if seen.contains(&input.prevout) || self.spent.contains_key(&input.prevout) {
                return Err(TxError::DoubleSpend { index });
            }
            seen.push(input.prevout);

            let utxo = self
                .resolve(&input.prevout)
                .ok_or(TxError::MissingInput { index })?;
            verify_input(tx, index, &utxo)?;
            total_input = total_input
                .checked_add(utxo.value)
                .ok_or(TxError::ValueOverflow)?;
        }
        Ok(total_input)
    }

    fn resolve(&self, outpoint: &OutPoint) -> Option<Utxo> {
        if self.spent.contains_key(outpoint) {
            return None;
        }
        self.created
            .get(outpoint)
            .cloned()
            .or_else(|| self.base.lookup(outpoint))
    }

    fn spend(&mut self, outpoint: &OutPoint) {
        // Outputs born in this block simply vanish; pre-existing ones are recorded
        if self.created.remove(outpoint).is_none() {
            if let Some(utxo) = self.base.lookup(outpoint) {
                self.spent.insert(*outpoint, utxo);
            }
        }
    }

    pub fn into_delta(self) -> UtxoDelta {
        UtxoDelta {
            created: self.created.into_values().collect(),
            spent: self.spent.into_values().collect(),
        }
    }
}
