// Persistent address book: one file per node mapping address to secret
// scalar. Public keys are recomputed on load.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use crate::core::serialize::{read_var_bytes, read_varint, write_var_bytes, write_varint};
use crate::error::{Error, Result};
use crate::wallet::Wallet;

const WALLET_DIR: &str = "./tmp";

fn wallet_file(node_id: &str) -> PathBuf {
    PathBuf::from(format!("{}/wallets_{}.data", WALLET_DIR, node_id))
}

/// All wallets known to this node, keyed by address.
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    /// Load the node's wallet file, or start empty if none exists yet.
    pub fn create(node_id: &str) -> Result<Self> {
        let path = wallet_file(node_id);
        if !path.exists() {
            return Ok(Self {
                wallets: HashMap::new(),
            });
        }

        let content = fs::read(&path)?;
        Ok(Self {
            wallets: Self::from_bytes(&content)?,
        })
    }

    /// Generate a new wallet, register it, and return its address.
    pub fn add_wallet(&mut self) -> String {
        let wallet = Wallet::generate();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        address
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    /// Persist every wallet's secret scalar to the node's wallet file.
    pub fn save_file(&self, node_id: &str) -> Result<()> {
        fs::create_dir_all(WALLET_DIR)?;
        fs::write(wallet_file(node_id), self.to_bytes())?;
        Ok(())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, self.wallets.len() as u64);
        for (address, wallet) in &self.wallets {
            write_var_bytes(&mut buf, address.as_bytes());
            write_var_bytes(&mut buf, &wallet.secret_bytes());
        }
        buf
    }

    fn from_bytes(data: &[u8]) -> Result<HashMap<String, Wallet>> {
        let mut cursor = Cursor::new(data);
        let count = read_varint(&mut cursor)? as usize;

        let mut wallets = HashMap::with_capacity(count);
        for _ in 0..count {
            let address_bytes = read_var_bytes(&mut cursor)?;
            let address = String::from_utf8(address_bytes)
                .map_err(|e| Error::Decode(format!("invalid wallet address: {}", e)))?;
            let secret = read_var_bytes(&mut cursor)?;
            wallets.insert(address, Wallet::from_secret_bytes(&secret)?);
        }
        Ok(wallets)
    }
}
