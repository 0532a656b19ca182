// Consensus rules

pub mod pow;

pub use pow::{ProofOfWork, DIFFICULTY};
