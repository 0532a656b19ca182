// Keys, addresses, and transaction building

pub mod tx_builder;
pub mod wallet;
pub mod wallets;

pub use tx_builder::new_utxo_transaction;
pub use wallet::{pub_key_hash_from_address, validate_address, Wallet};
pub use wallets::Wallets;
