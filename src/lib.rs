// Educational UTXO blockchain node: PoW mining, persistent chain + UTXO
// index, and a gossip-style peer protocol.

pub mod cli;
pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::consensus::{ProofOfWork, DIFFICULTY};
pub use crate::core::{Block, Transaction, TxInput, TxOutput, TxOutputs};
pub use crate::error::{Error, Result};
pub use crate::storage::{Blockchain, UtxoSet};
pub use crate::wallet::{Wallet, Wallets};
