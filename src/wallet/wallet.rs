// Keypair generation and Base58Check addressing

use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

use crate::core::hash::{double_sha256, hash160};
use crate::error::{Error, Result};

/// Network version byte prepended to every address
pub const VERSION_BYTE: u8 = 0x00;
/// Trailing checksum bytes in a decoded address
pub const CHECKSUM_LENGTH: usize = 4;
/// version(1) + pubKeyHash(20) + checksum(4)
const ADDRESS_LENGTH: usize = 25;

/// A keypair. Only the secret scalar is persisted; the public key is the
/// uncompressed `X || Y` concatenation (64 bytes), recomputed on load.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub secret_key: SecretKey,
    pub public_key: Vec<u8>,
}

impl Wallet {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let mut rng = OsRng;
        let secret_key = SecretKey::new(&mut rng);
        let public_key = secret_key.public_key(&secp);

        Self {
            secret_key,
            public_key: strip_sec1_tag(&public_key),
        }
    }

    /// Rebuild a wallet from its persisted secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let public_key = secret_key.public_key(&secp);

        Ok(Self {
            secret_key,
            public_key: strip_sec1_tag(&public_key),
        })
    }

    /// The 32-byte big-endian secret scalar, as written to the wallet file.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    pub fn pub_key_hash(&self) -> Vec<u8> {
        hash160(&self.public_key)
    }

    /// Base58 of `version || RIPEMD160(SHA256(pubkey)) || checksum`.
    pub fn address(&self) -> String {
        let mut payload = Vec::with_capacity(ADDRESS_LENGTH);
        payload.push(VERSION_BYTE);
        payload.extend_from_slice(&self.pub_key_hash());
        let check = checksum(&payload);
        payload.extend_from_slice(&check);
        bs58::encode(payload).into_string()
    }
}

// The secp256k1 crate serializes uncompressed keys as 0x04 || X || Y; the
// wire and signing formats carry only X || Y.
fn strip_sec1_tag(public_key: &PublicKey) -> Vec<u8> {
    public_key.serialize_uncompressed()[1..].to_vec()
}

/// First four bytes of the double SHA-256 of `payload`.
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    double_sha256(payload)[..CHECKSUM_LENGTH].to_vec()
}

/// Decode an address and return its 20-byte public-key hash, rejecting
/// wrong lengths and checksum mismatches.
pub fn pub_key_hash_from_address(address: &str) -> Result<Vec<u8>> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;

    if decoded.len() != ADDRESS_LENGTH {
        return Err(Error::InvalidAddress(address.to_string()));
    }

    let payload = &decoded[..ADDRESS_LENGTH - CHECKSUM_LENGTH];
    let actual_checksum = &decoded[ADDRESS_LENGTH - CHECKSUM_LENGTH..];
    if checksum(payload) != actual_checksum {
        return Err(Error::InvalidAddress(address.to_string()));
    }

    Ok(decoded[1..ADDRESS_LENGTH - CHECKSUM_LENGTH].to_vec())
}

pub fn validate_address(address: &str) -> bool {
    pub_key_hash_from_address(address).is_ok()
}
