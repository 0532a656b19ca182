// Crate-wide error type

use std::fmt;

/// Everything that can go wrong across the node
#[derive(Debug)]
pub enum Error {
    /// Address failed Base58Check validation
    InvalidAddress(String),
    /// Coin selection could not cover the requested amount
    InsufficientFunds { have: u64, need: u64 },
    /// `createblockchain` on a node that already has a chain
    ChainExists,
    /// Any chain operation before `createblockchain`
    ChainNotFound,
    /// An input references a transaction the chain does not contain
    TxNotFound,
    /// Signature verification failed for a transaction offered for mining
    InvalidTransaction,
    /// Block hash not present in the store
    BlockNotFound,
    /// Nonce space exhausted without a solution (difficulty misconfigured)
    PowExhausted,
    /// Underlying key-value store failure
    Storage(String),
    /// Socket or file I/O failure
    Io(String),
    /// Malformed serialized data (truncated or corrupt)
    Decode(String),
    /// Key or signature material rejected by the curve implementation
    Crypto(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidAddress(addr) => write!(f, "invalid address: {}", addr),
            Error::InsufficientFunds { have, need } => {
                write!(f, "insufficient funds: have {}, need {}", have, need)
            }
            Error::ChainExists => write!(f, "blockchain already exists"),
            Error::ChainNotFound => write!(f, "no existing blockchain found, create one first"),
            Error::TxNotFound => write!(f, "transaction does not exist"),
            Error::InvalidTransaction => write!(f, "invalid transaction"),
            Error::BlockNotFound => write!(f, "block not found"),
            Error::PowExhausted => write!(f, "proof-of-work nonce space exhausted"),
            Error::Storage(msg) => write!(f, "storage error: {}", msg),
            Error::Io(msg) => write!(f, "i/o error: {}", msg),
            Error::Decode(msg) => write!(f, "decode error: {}", msg),
            Error::Crypto(msg) => write!(f, "crypto error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<secp256k1::Error> for Error {
    fn from(err: secp256k1::Error) -> Self {
        Error::Crypto(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
