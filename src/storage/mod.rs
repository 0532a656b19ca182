// Persistence layer: chain store and UTXO index over one sled database
// per node

pub mod chain;
pub mod utxo_set;

pub use chain::{Blockchain, ChainIterator};
pub use utxo_set::{UtxoSet, UTXO_PREFIX};
