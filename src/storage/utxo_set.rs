// Persistent UTXO index: one record per transaction that still has unspent
// outputs, stored next to the blocks under the "utxo-" key prefix.

use std::collections::HashMap;

use sled::Batch;

use crate::core::Block;
use crate::core::{Serializable, TxOutput, TxOutputs};
use crate::error::{Error, Result};
use crate::storage::Blockchain;

pub const UTXO_PREFIX: &[u8] = b"utxo-";
const DELETE_BATCH_SIZE: usize = 100_000;

/// View over the chain's database restricted to the UTXO index.
pub struct UtxoSet<'a> {
    chain: &'a Blockchain,
}

impl<'a> UtxoSet<'a> {
    pub fn new(chain: &'a Blockchain) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &Blockchain {
        self.chain
    }

    fn key_for(txid: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(UTXO_PREFIX.len() + txid.len());
        key.extend_from_slice(UTXO_PREFIX);
        key.extend_from_slice(txid);
        key
    }

    /// Rebuild the whole index from the chain: drop every "utxo-" key, scan
    /// tip to genesis, write one record per transaction with unspent
    /// outputs.
    pub fn reindex(&self) -> Result<()> {
        self.delete_by_prefix()?;

        let utxo = self.chain.find_utxo()?;
        let mut batch = Batch::default();
        for (txid_hex, outputs) in utxo {
            let txid = hex::decode(&txid_hex)
                .map_err(|e| Error::Decode(format!("invalid txid key: {}", e)))?;
            batch.insert(Self::key_for(&txid), outputs.serialize());
        }
        self.chain.db().apply_batch(batch)?;
        Ok(())
    }

    /// Fold one block into the index: inputs remove the outputs they spend,
    /// and every transaction's outputs are inserted as unspent. All writes
    /// land in a single atomic batch; an overlay keeps reads coherent when
    /// a transaction spends an output touched earlier in the same block.
    pub fn update(&self, block: &Block) -> Result<()> {
        let mut overlay: HashMap<Vec<u8>, Option<TxOutputs>> = HashMap::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = Self::key_for(&input.prev_txid);
                    let record = match overlay.get(&key) {
                        Some(entry) => entry.clone(),
                        None => self
                            .chain
                            .db()
                            .get(&key)?
                            .map(|value| TxOutputs::deserialize(&value))
                            .transpose()?,
                    };

                    let mut record = record.ok_or(Error::TxNotFound)?;
                    record
                        .outputs
                        .retain(|(index, _)| *index as i32 != input.out_index);

                    let entry = if record.outputs.is_empty() {
                        None
                    } else {
                        Some(record)
                    };
                    overlay.insert(key, entry);
                }
            }

            let fresh = TxOutputs {
                outputs: tx
                    .outputs
                    .iter()
                    .enumerate()
                    .map(|(index, output)| (index as u32, output.clone()))
                    .collect(),
            };
            overlay.insert(Self::key_for(&tx.id), Some(fresh));
        }

        let mut batch = Batch::default();
        for (key, entry) in overlay {
            match entry {
                Some(record) => batch.insert(key, record.serialize()),
                None => batch.remove(key),
            }
        }
        self.chain.db().apply_batch(batch)?;
        Ok(())
    }

    /// Coin selection: accumulate outputs locked to `pub_key_hash` until
    /// `amount` is covered. Returns the accumulated value and the selected
    /// output indices per hex txid.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<i32>>)> {
        let mut selection: HashMap<String, Vec<i32>> = HashMap::new();
        let mut accumulated = 0u64;

        for item in self.chain.db().scan_prefix(UTXO_PREFIX) {
            let (key, value) = item?;
            let record = TxOutputs::deserialize(&value)?;
            let txid = hex::encode(&key[UTXO_PREFIX.len()..]);

            for (index, output) in &record.outputs {
                if output.is_locked_with_key(pub_key_hash) && accumulated < amount {
                    accumulated += output.value;
                    selection.entry(txid.clone()).or_default().push(*index as i32);
                }
            }
        }

        Ok((accumulated, selection))
    }

    /// Every unspent output locked to `pub_key_hash` (balance query).
    pub fn find_unspent_outputs(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut outputs = Vec::new();

        for item in self.chain.db().scan_prefix(UTXO_PREFIX) {
            let (_, value) = item?;
            let record = TxOutputs::deserialize(&value)?;
            for (_, output) in record.outputs {
                if output.is_locked_with_key(pub_key_hash) {
                    outputs.push(output);
                }
            }
        }

        Ok(outputs)
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.chain.db().scan_prefix(UTXO_PREFIX) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    // Collect all index keys, then remove them in bounded batches so a
    // large index never turns into one giant write.
    fn delete_by_prefix(&self) -> Result<()> {
        let mut keys = Vec::new();
        for item in self.chain.db().scan_prefix(UTXO_PREFIX) {
            let (key, _) = item?;
            keys.push(key);
        }

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let mut batch = Batch::default();
            for key in chunk {
                batch.remove(key.clone());
            }
            self.chain.db().apply_batch(batch)?;
        }
        Ok(())
    }
}
