//! Transaction construction, hashing and validation

use crate::constants::*;
use crate::crypto::{self, KeyPair};
use crate::error::{ConsensusError, Result, TxError};
use crate::types::*;
use std::time::{SystemTime, UNIX_EPOCH};

impl Transaction {
    /// Build a version-1 transaction stamped with the current time
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        Self::with_timestamp(inputs, outputs, current_timestamp())
    }

    pub fn with_timestamp(
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        timestamp: i64,
    ) -> Self {
        let mut tx = Transaction {
            version: LEDGER_VERSION,
            inputs,
            outputs,
            lock_time: 0,
            timestamp,
            hash: ZERO_HASH,
        };
        tx.refresh_hash();
        tx
    }

    /// Reward transaction paying `value` to `address`.
    ///
    /// The block height is carried in `lock_time` so two coinbases paying the
    /// same address the same amount in the same second still hash apart.
    pub fn coinbase(address: &str, value: Amount, height: u64, timestamp: i64) -> Self {
        let mut tx = Transaction {
            version: LEDGER_VERSION,
            inputs: vec![TransactionInput::new(OutPoint::coinbase())],
            outputs: vec![TransactionOutput {
                value,
                address: address.to_string(),
                lock_script: DEFAULT_LOCK_SCRIPT.to_string(),
            }],
            lock_time: height as i64,
            timestamp,
            hash: ZERO_HASH,
        };
        tx.refresh_hash();
        tx
    }

    /// Double SHA-256 of the canonical serialization
    pub fn compute_hash(&self) -> Hash {
        crypto::double_sha256(&serialize_transaction(self))
    }

    /// Recompute `hash` after mutating any hashed field
    pub fn refresh_hash(&mut self) {
        self.hash = self.compute_hash();
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_coinbase()
    }

    pub fn total_output(&self) -> std::result::Result<Amount, TxError> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.value))
            .ok_or(TxError::ValueOverflow)
    }

    /// Attach a signature over the transaction hash and the signer's public key to input `index`
    pub fn sign_input(&mut self, index: usize, keys: &KeyPair) -> Result<()> {
        let signature = keys.sign(&self.hash)?;
        let input = self
            .inputs
            .get_mut(index)
            .ok_or_else(|| ConsensusError::Crypto(format!("no input at index {}", index)))?;
        input.signature = signature;
        input.public_key = keys.public_key_bytes();
        Ok(())
    }

    /// Sign every input with the same key
    pub fn sign_all(&mut self, keys: &KeyPair) -> Result<()> {
        for index in 0..self.inputs.len() {
            self.sign_input(index, keys)?;
        }
        Ok(())
    }
}

/// Canonical little-endian encoding. Strings are length-prefixed, input
/// authorization data is excluded.
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(
        4 + 4 + tx.inputs.len() * 36 + 4 + tx.outputs.len() * 48 + 16,
    );

    bytes.extend_from_slice(&tx.version.to_le_bytes());

    bytes.extend_from_slice(&(tx.inputs.len() as u32).to_le_bytes());
    for input in &tx.inputs {
        bytes.extend_from_slice(&input.prevout.hash);
        bytes.extend_from_slice(&input.prevout.index.to_le_bytes());
    }

    bytes.extend_from_slice(&(tx.outputs.len() as u32).to_le_bytes());
    for output in &tx.outputs {
        bytes.extend_from_slice(&output.value.to_le_bytes());
        write_str(&mut bytes, &output.address);
        write_str(&mut bytes, &output.lock_script);
    }

    bytes.extend_from_slice(&tx.lock_time.to_le_bytes());
    bytes.extend_from_slice(&tx.timestamp.to_le_bytes());
    bytes
}

fn write_str(bytes: &mut Vec<u8>, value: &str) {
    bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
    bytes.extend_from_slice(value.as_bytes());
}

/// CheckTransaction: context-free structure rules
///
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. stored hash = recomputed hash
/// 3. Σ outs does not overflow
pub fn check_transaction(tx: &Transaction) -> std::result::Result<(), TxError> {
    if tx.inputs.is_empty() {
        return Err(TxError::NoInputs);
    }
    if tx.outputs.is_empty() {
        return Err(TxError::NoOutputs);
    }
    if !tx.has_valid_hash() {
        return Err(TxError::HashMismatch);
    }
    tx.total_output()?;
    Ok(())
}

/// Check that input `index` of `tx` is authorized to spend `utxo`: its public
/// key must derive `utxo.address` and its signature must cover `tx.hash`.
pub fn verify_input(tx: &Transaction, index: usize, utxo: &Utxo) -> std::result::Result<(), TxError> {
    let unauthorized = |reason: &str| TxError::Unauthorized {
        index,
        reason: reason.to_string(),
    };
    let input = tx.inputs.get(index).ok_or_else(|| unauthorized("no such input"))?;

    if input.public_key.is_empty() {
        return Err(unauthorized("missing public key"));
    }
    let owner = crypto::address_from_public_key(&input.public_key)
        .map_err(|_| unauthorized("malformed public key"))?;
    if owner != utxo.address {
        return Err(unauthorized("public key does not own the referenced output"));
    }
    if !crypto::verify_signature(&input.public_key, &input.signature, &tx.hash) {
        return Err(unauthorized("signature verification failed"));
    }
    Ok(())
}

/// Fee = Σ inputs − Σ outputs, failing when outputs exceed inputs
pub fn calculate_fee(total_input: Amount, tx: &Transaction) -> std::result::Result<Amount, TxError> {
    let total_output = tx.total_output()?;
    if total_input < total_output {
        return Err(TxError::InsufficientInput {
            inputs: total_input,
            outputs: total_output,
        });
    }
    Ok(total_input - total_output)
}

/// Seconds since the Unix epoch
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(value: Amount, address: &str) -> TransactionOutput {
        TransactionOutput {
            value,
            address: address.to_string(),
            lock_script: DEFAULT_LOCK_SCRIPT.to_string(),
        }
    }

    #[test]
    fn test_new_assigns_hash() {
        let tx = Transaction::new(
            vec![TransactionInput::new(OutPoint::new([1; 32], 0))],
            vec![output(1000, "VDXalice")],
        );
        assert_ne!(tx.hash, ZERO_HASH);
        assert!(tx.has_valid_hash());
    }

    #[test]
    fn test_mutation_invalidates_hash() {
        let mut tx = Transaction::with_timestamp(
            vec![TransactionInput::new(OutPoint::new([1; 32], 0))],
            vec![output(1000, "VDXalice")],
            1_700_000_000,
        );
        tx.outputs[0].value = 2000;
        assert!(!tx.has_valid_hash());
        assert_eq!(check_transaction(&tx), Err(TxError::HashMismatch));

        tx.refresh_hash();
        assert!(check_transaction(&tx).is_ok());
    }

    #[test]
    fn test_signatures_do_not_change_hash() {
        let keys = KeyPair::generate();
        let mut tx = Transaction::with_timestamp(
            vec![TransactionInput::new(OutPoint::new([1; 32], 0))],
            vec![output(1000, "VDXalice")],
            1_700_000_000,
        );
        let before = tx.hash;
        tx.sign_all(&keys).unwrap();
        assert_eq!(tx.hash, before);
        assert!(tx.has_valid_hash());
    }

    #[test]
    fn test_is_coinbase() {
        let coinbase = Transaction::coinbase("VDXminer", INITIAL_REWARD, 0, 1_700_000_000);
        assert!(coinbase.is_coinbase());

        let spend = Transaction::new(
            vec![TransactionInput::new(OutPoint::new([1; 32], 0))],
            vec![output(1, "VDXbob")],
        );
        assert!(!spend.is_coinbase());

        let two_sentinels = Transaction::new(
            vec![
                TransactionInput::new(OutPoint::coinbase()),
                TransactionInput::new(OutPoint::coinbase()),
            ],
            vec![output(1, "VDXbob")],
        );
        assert!(!two_sentinels.is_coinbase());
    }

    #[test]
    fn test_coinbase_hash_depends_on_height() {
        let a = Transaction::coinbase("VDXminer", INITIAL_REWARD, 1, 1_700_000_000);
        let b = Transaction::coinbase("VDXminer", INITIAL_REWARD, 2, 1_700_000_000);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_check_transaction_empty_sides() {
        let no_inputs = Transaction::new(vec![], vec![output(1, "VDXbob")]);
        assert_eq!(check_transaction(&no_inputs), Err(TxError::NoInputs));

        let no_outputs =
            Transaction::new(vec![TransactionInput::new(OutPoint::new([1; 32], 0))], vec![]);
        assert_eq!(check_transaction(&no_outputs), Err(TxError::NoOutputs));
    }

    #[test]
    fn test_output_overflow() {
        let tx = Transaction::new(
            vec![TransactionInput::new(OutPoint::new([1; 32], 0))],
            vec![output(u64::MAX, "VDXa"), output(1, "VDXb")],
        );
        assert_eq!(check_transaction(&tx), Err(TxError::ValueOverflow));
    }

    #[test]
    fn test_calculate_fee() {
        let tx = Transaction::new(
            vec![TransactionInput::new(OutPoint::new([1; 32], 0))],
            vec![output(900, "VDXbob")],
        );
        assert_eq!(calculate_fee(1000, &tx), Ok(100));
        assert_eq!(
            calculate_fee(800, &tx),
            Err(TxError::InsufficientInput { inputs: 800, outputs: 900 })
        );
    }

    #[test]
    fn test_verify_input() {
        let keys = KeyPair::generate();
        let prevout = OutPoint::new([3; 32], 1);
        let utxo = Utxo {
            outpoint: prevout,
            value: 1000,
            address: keys.address(),
            lock_script: DEFAULT_LOCK_SCRIPT.to_string(),
            height: 0,
        };
        let mut tx = Transaction::new(
            vec![TransactionInput::new(prevout)],
            vec![output(900, "VDXbob")],
        );

        assert!(matches!(
            verify_input(&tx, 0, &utxo),
            Err(TxError::Unauthorized { index: 0, .. })
        ));

        tx.sign_input(0, &keys).unwrap();
        assert_eq!(verify_input(&tx, 0, &utxo), Ok(()));

        let thief = KeyPair::generate();
        tx.sign_input(0, &thief).unwrap();
        assert!(verify_input(&tx, 0, &utxo).is_err());
    }
}
