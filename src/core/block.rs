// Block envelope

use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consensus::ProofOfWork;
use crate::core::merkle::merkle_root;
use crate::core::serialize::{
    read_i64_le, read_u32_le, read_var_bytes, read_varint, write_var_bytes, write_varint,
    Serializable,
};
use crate::core::transaction::Transaction;
use crate::error::{Error, Result};

/// One block of the chain. `prev_hash` is empty only for the genesis block;
/// `hash` and `nonce` are filled in by mining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub timestamp: i64,
    pub prev_hash: Vec<u8>,
    pub transactions: Vec<Transaction>,
    pub nonce: i64,
    pub height: u32,
    pub hash: Vec<u8>,
}

impl Block {
    /// Assemble and mine a block on top of `prev_hash`.
    pub fn new(transactions: Vec<Transaction>, prev_hash: Vec<u8>, height: u32) -> Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Io(e.to_string()))?
            .as_secs() as i64;

        let mut block = Self {
            timestamp,
            prev_hash,
            transactions,
            nonce: 0,
            height,
            hash: Vec::new(),
        };

        let (nonce, hash) = ProofOfWork::new(&block).run()?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Mine the genesis block around its coinbase transaction.
    pub fn genesis(coinbase: Transaction) -> Result<Self> {
        Self::new(vec![coinbase], Vec::new(), 0)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Merkle root over the serialized transactions, in block order.
    pub fn hash_transactions(&self) -> Vec<u8> {
        let serialized: Vec<Vec<u8>> = self.transactions.iter().map(|tx| tx.serialize()).collect();
        merkle_root(&serialized)
    }
}

impl Serializable for Block {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        write_var_bytes(buf, &self.prev_hash);
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        write_var_bytes(buf, &self.hash);
        write_varint(buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write_to(buf);
        }
    }

    fn read_from(reader: &mut dyn Read) -> Result<Self> {
        let timestamp = read_i64_le(reader)?;
        let prev_hash = read_var_bytes(reader)?;
        let nonce = read_i64_le(reader)?;
        let height = read_u32_le(reader)?;
        let hash = read_var_bytes(reader)?;

        let tx_count = read_varint(reader)? as usize;
        let mut transactions = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            transactions.push(Transaction::read_from(reader)?);
        }

        Ok(Self {
            timestamp,
            prev_hash,
            transactions,
            nonce,
            height,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn genesis_block() -> Block {
        let wallet = Wallet::generate();
        let coinbase = Transaction::coinbase(&wallet.address(), b"test genesis".to_vec()).unwrap();
        Block::genesis(coinbase).unwrap()
    }

    #[test]
    fn genesis_shape() {
        let block = genesis_block();
        assert!(block.is_genesis());
        assert_eq!(block.height, 0);
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(block.hash.len(), 32);
    }

    #[test]
    fn mined_block_passes_pow() {
        let block = genesis_block();
        assert!(ProofOfWork::new(&block).validate());
    }

    #[test]
    fn serialization_round_trip() {
        let block = genesis_block();
        let decoded = Block::deserialize(&block.serialize()).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn merkle_root_tracks_transactions() {
        let block = genesis_block();
        let root = block.hash_transactions();
        assert_eq!(root.len(), 32);

        let mut tampered = block.clone();
        tampered.transactions[0].outputs[0].value += 1;
        assert_ne!(root, tampered.hash_transactions());
    }

    #[test]
    fn child_block_links_to_parent() {
        let wallet = Wallet::generate();
        let parent = genesis_block();
        let coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        let child = Block::new(vec![coinbase], parent.hash.clone(), 1).unwrap();

        assert_eq!(child.prev_hash, parent.hash);
        assert_eq!(child.height, 1);
        assert!(ProofOfWork::new(&child).validate());
    }
}
