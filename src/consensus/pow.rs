// Proof of Work: nonce search below a fixed difficulty target

use crate::core::hash::sha256;
use crate::core::Block;
use crate::error::{Error, Result};

/// Network-wide fixed difficulty: a valid block hash is strictly below
/// `2^(256 - DIFFICULTY)`.
pub const DIFFICULTY: u32 = 12;

/// PoW context for one block. Holds the 32-byte big-endian target and the
/// Merkle root, both computed once so the mining loop only hashes.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle_root: Vec<u8>,
    target: [u8; 32],
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block) -> Self {
        Self {
            block,
            merkle_root: block.hash_transactions(),
            target: target_bytes(DIFFICULTY),
        }
    }

    /// The hashed preimage: `prev_hash || merkle_root || be8(nonce) ||
    /// be8(difficulty)`. Timestamp and height stay outside the preimage.
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data =
            Vec::with_capacity(self.block.prev_hash.len() + self.merkle_root.len() + 16);
        data.extend_from_slice(&self.block.prev_hash);
        data.extend_from_slice(&self.merkle_root);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&(DIFFICULTY as i64).to_be_bytes());
        data
    }

    /// Search nonces from zero until the hash drops below the target.
    /// Exhausting the nonce space is fatal.
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        let mut nonce: i64 = 0;

        while nonce < i64::MAX {
            let hash = sha256(&self.prepare_data(nonce));
            if self.meets_target(&hash) {
                log::debug!(
                    "mined block at height {} with nonce {}",
                    self.block.height,
                    nonce
                );
                return Ok((nonce, hash));
            }

            nonce += 1;
            if nonce % 1_000_000 == 0 {
                log::debug!("mining attempts: {}", nonce);
            }
        }

        Err(Error::PowExhausted)
    }

    /// Re-derive the hash from the stored nonce and check it against both
    /// the stored hash and the target. O(1).
    pub fn validate(&self) -> bool {
        let hash = sha256(&self.prepare_data(self.block.nonce));
        hash == self.block.hash && self.meets_target(&hash)
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        // Byte-wise lexicographic compare of equal-length arrays is the
        // 256-bit big-endian integer compare
        hash < &self.target[..]
    }
}

/// 32-byte big-endian encoding of `1 << (256 - difficulty)`.
fn target_bytes(difficulty: u32) -> [u8; 32] {
    debug_assert!((1..=255).contains(&difficulty));
    let bit = 256 - difficulty as usize;
    let mut target = [0u8; 32];
    target[(255 - bit) / 8] = 1 << (bit % 8);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    fn mined_block() -> Block {
        let wallet = Wallet::generate();
        let coinbase = Transaction::coinbase(&wallet.address(), b"pow test".to_vec()).unwrap();
        Block::genesis(coinbase).unwrap()
    }

    #[test]
    fn target_encoding() {
        // difficulty 12: bit 244 set -> second byte is 0x10
        let target = target_bytes(12);
        assert_eq!(target[0], 0x00);
        assert_eq!(target[1], 0x10);
        assert!(target[2..].iter().all(|&b| b == 0));

        // difficulty 1: highest bit of the first byte
        assert_eq!(target_bytes(1)[0], 0x80);

        // difficulty 8: 2^248 -> first byte is 0x01
        assert_eq!(target_bytes(8)[0], 0x01);
    }

    #[test]
    fn target_comparison_bounds() {
        let block = mined_block();
        let pow = ProofOfWork::new(&block);

        assert!(pow.meets_target(&[0u8; 32]));
        assert!(!pow.meets_target(&[0xff; 32]));
        // Equality is not below the target
        assert!(!pow.meets_target(&pow.target.clone()));
    }

    #[test]
    fn mined_hash_validates() {
        let block = mined_block();
        let pow = ProofOfWork::new(&block);

        assert!(pow.validate());
        assert!(block.hash < target_bytes(DIFFICULTY).to_vec());
    }

    #[test]
    fn tampered_transaction_invalidates() {
        let mut block = mined_block();
        block.transactions[0].outputs[0].value += 1;
        assert!(!ProofOfWork::new(&block).validate());
    }

    #[test]
    fn tampered_stored_hash_invalidates() {
        let mut block = mined_block();
        block.hash[0] ^= 0x01;
        assert!(!ProofOfWork::new(&block).validate());
    }

    #[test]
    fn wrong_nonce_invalidates() {
        let mut block = mined_block();
        block.nonce += 1;
        assert!(!ProofOfWork::new(&block).validate());
    }
}
