// Durable chain store: sled database mapping block hash -> block, with a
// tip pointer under "lh".

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use secp256k1::SecretKey;
use sled::{Batch, Db};

use crate::core::{Block, Serializable, Transaction, TxOutputs};
use crate::error::{Error, Result};

const TIP_KEY: &[u8] = b"lh";
const GENESIS_DATA: &str = "First Transaction from Genesis";
const DB_DIR: &str = "./tmp";

fn db_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("{}/blocks_{}", DB_DIR, node_id))
}

/// Handle to the persistent chain. Shared by reference across tasks; the
/// in-memory tip is guarded by a mutex that also serializes writers through
/// `mine_block`/`add_block`.
pub struct Blockchain {
    db: Db,
    last_hash: Mutex<Vec<u8>>,
}

impl Blockchain {
    /// Create a brand new chain whose genesis coinbase pays `address`.
    /// Fails if this node already has a chain.
    pub fn init(address: &str, node_id: &str) -> Result<Self> {
        let path = db_path(node_id);
        if path.exists() {
            return Err(Error::ChainExists);
        }
        let db = sled::open(path)?;
        Self::init_with_db(db, address)
    }

    /// Open this node's existing chain. Fails if none has been created.
    pub fn open(node_id: &str) -> Result<Self> {
        let path = db_path(node_id);
        if !path.exists() {
            return Err(Error::ChainNotFound);
        }
        let db = sled::open(path)?;
        Self::open_with_db(db)
    }

    pub(crate) fn init_with_db(db: Db, address: &str) -> Result<Self> {
        let coinbase = Transaction::coinbase(address, GENESIS_DATA.as_bytes().to_vec())?;
        let genesis = Block::genesis(coinbase)?;
        log::info!("genesis block created: {}", hex::encode(&genesis.hash));

        let mut batch = Batch::default();
        batch.insert(genesis.hash.clone(), genesis.serialize());
        batch.insert(TIP_KEY, genesis.hash.clone());
        db.apply_batch(batch)?;

        Ok(Self {
            last_hash: Mutex::new(genesis.hash),
            db,
        })
    }

    pub(crate) fn open_with_db(db: Db) -> Result<Self> {
        let last_hash = db.get(TIP_KEY)?.ok_or(Error::ChainNotFound)?.to_vec();
        Ok(Self {
            last_hash: Mutex::new(last_hash),
            db,
        })
    }

    /// In-memory chain backed by a temporary sled database.
    #[cfg(test)]
    pub fn open_temporary(address: &str) -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Self::init_with_db(db, address).unwrap()
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    fn tip(&self) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.last_hash
            .lock()
            .map_err(|_| Error::Storage("tip lock poisoned".to_string()))
    }

    /// Verify every candidate transaction, mine a block extending the tip,
    /// persist it, and advance the tip. Writers are serialized by the tip
    /// lock, held across the whole read-mine-write sequence.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        if transactions.is_empty() {
            return Err(Error::InvalidTransaction);
        }
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(Error::InvalidTransaction);
            }
        }

        let mut tip = self.tip()?;
        let last_block = self.get_block(&tip)?;
        let block = Block::new(transactions, tip.clone(), last_block.height + 1)?;

        let mut batch = Batch::default();
        batch.insert(block.hash.clone(), block.serialize());
        batch.insert(TIP_KEY, block.hash.clone());
        self.db.apply_batch(batch)?;

        *tip = block.hash.clone();
        Ok(block)
    }

    /// Store a block received from a peer. Re-adding a known block is a
    /// no-op; the tip only moves for a strictly greater height.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let mut tip = self.tip()?;
        if self.db.contains_key(&block.hash)? {
            return Ok(());
        }

        let mut batch = Batch::default();
        batch.insert(block.hash.clone(), block.serialize());

        let tip_block = self.get_block(&tip)?;
        if block.height > tip_block.height {
            batch.insert(TIP_KEY, block.hash.clone());
            self.db.apply_batch(batch)?;
            *tip = block.hash.clone();
        } else {
            self.db.apply_batch(batch)?;
        }
        Ok(())
    }

    pub fn get_block(&self, hash: &[u8]) -> Result<Block> {
        let data = self.db.get(hash)?.ok_or(Error::BlockNotFound)?;
        Block::deserialize(&data)
    }

    pub fn best_height(&self) -> Result<u32> {
        let tip = self.tip()?.clone();
        Ok(self.get_block(&tip)?.height)
    }

    /// All block hashes, tip first down to genesis.
    pub fn block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut hashes = Vec::new();
        for block in self.iterator() {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Lazy reverse walk from the tip to genesis.
    pub fn iterator(&self) -> ChainIterator<'_> {
        let current_hash = self
            .last_hash
            .lock()
            .map(|tip| tip.clone())
            .unwrap_or_default();
        ChainIterator {
            db: &self.db,
            current_hash: Some(current_hash),
        }
    }

    /// First (most recent) transaction with the given id.
    pub fn find_transaction(&self, id: &[u8]) -> Result<Transaction> {
        for block in self.iterator() {
            for tx in block?.transactions {
                if tx.id == id {
                    return Ok(tx);
                }
            }
        }
        Err(Error::TxNotFound)
    }

    /// Resolve the previous transactions of every input and sign.
    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev_txs = self.previous_transactions(tx)?;
        tx.sign(secret_key, &prev_txs)
    }

    /// Resolve the previous transactions of every input and verify.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.previous_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    fn previous_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            if input.is_coinbase() {
                continue;
            }
            let prev_tx = self.find_transaction(&input.prev_txid)?;
            prev_txs.insert(hex::encode(&input.prev_txid), prev_tx);
        }
        Ok(prev_txs)
    }

    /// Scan the whole chain for unspent outputs, keyed by hex txid. The
    /// tip-to-genesis walk sees spends before the outputs they consume.
    pub fn find_utxo(&self) -> Result<HashMap<String, TxOutputs>> {
        let mut utxo: HashMap<String, TxOutputs> = HashMap::new();
        let mut spent: HashMap<String, Vec<i32>> = HashMap::new();

        for block in self.iterator() {
            for tx in &block?.transactions {
                let txid = hex::encode(&tx.id);

                for (index, output) in tx.outputs.iter().enumerate() {
                    let is_spent = spent
                        .get(&txid)
                        .map_or(false, |indices| indices.contains(&(index as i32)));
                    if is_spent {
                        continue;
                    }
                    utxo.entry(txid.clone())
                        .or_default()
                        .outputs
                        .push((index as u32, output.clone()));
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent
                            .entry(hex::encode(&input.prev_txid))
                            .or_default()
                            .push(input.out_index);
                    }
                }
            }
        }
        Ok(utxo)
    }

    /// Durability barrier, called by the shutdown supervisor and on CLI
    /// exit paths.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Walks blocks tip to genesis by following `prev_hash`. Yields each block
/// once; terminates after the block whose `prev_hash` is empty.
pub struct ChainIterator<'a> {
    db: &'a Db,
    current_hash: Option<Vec<u8>>,
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        if hash.is_empty() {
            return None;
        }

        let data = match self.db.get(&hash) {
            Ok(Some(data)) => data,
            Ok(None) => return Some(Err(Error::BlockNotFound)),
            Err(e) => return Some(Err(e.into())),
        };

        match Block::deserialize(&data) {
            Ok(block) => {
                if !block.prev_hash.is_empty() {
                    self.current_hash = Some(block.prev_hash.clone());
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
