// Transaction data model: inputs spending previous outputs, outputs locked
// to public-key hashes, and the per-input ECDSA signing protocol.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::core::hash::sha256;
use crate::core::serialize::{
    read_i32_le, read_u32_le, read_u64_le, read_var_bytes, read_varint, write_var_bytes,
    write_varint, Serializable,
};
use crate::error::{Error, Result};
use crate::wallet;

/// Mining reward minted by each coinbase transaction
pub const SUBSIDY: u64 = 100;

/// Reference to a previous output, plus the material proving the right to
/// spend it. A coinbase input has an empty `prev_txid`, `out_index == -1`,
/// an empty signature, and arbitrary miner data in `pub_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub prev_txid: Vec<u8>,
    pub out_index: i32,
    pub signature: Vec<u8>,
    pub pub_key: Vec<u8>,
}

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        self.prev_txid.is_empty() && self.out_index == -1
    }
}

impl Serializable for TxInput {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_var_bytes(buf, &self.prev_txid);
        buf.extend_from_slice(&self.out_index.to_le_bytes());
        write_var_bytes(buf, &self.signature);
        write_var_bytes(buf, &self.pub_key);
    }

    fn read_from(reader: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            prev_txid: read_var_bytes(reader)?,
            out_index: read_i32_le(reader)?,
            signature: read_var_bytes(reader)?,
            pub_key: read_var_bytes(reader)?,
        })
    }
}

/// A value locked to a public-key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, pub_key_hash: Vec<u8>) -> Self {
        Self { value, pub_key_hash }
    }

    /// Create an output locked to the holder of `address`
    pub fn locked_to(value: u64, address: &str) -> Result<Self> {
        let pub_key_hash = wallet::pub_key_hash_from_address(address)?;
        Ok(Self { value, pub_key_hash })
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

impl Serializable for TxOutput {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(buf, &self.pub_key_hash);
    }

    fn read_from(reader: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            value: read_u64_le(reader)?,
            pub_key_hash: read_var_bytes(reader)?,
        })
    }
}

/// The still-unspent outputs of one transaction, each tagged with its
/// original output index. This is the record stored per txid in the UTXO
/// index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOutputs {
    pub outputs: Vec<(u32, TxOutput)>,
}

impl Serializable for TxOutputs {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.outputs.len() as u64);
        for (index, output) in &self.outputs {
            buf.extend_from_slice(&index.to_le_bytes());
            output.write_to(buf);
        }
    }

    fn read_from(reader: &mut dyn Read) -> Result<Self> {
        let count = read_varint(reader)? as usize;
        let mut outputs = Vec::with_capacity(count);
        for _ in 0..count {
            let index = read_u32_le(reader)?;
            outputs.push((index, TxOutput::read_from(reader)?));
        }
        Ok(Self { outputs })
    }
}

/// A transfer of value: inputs consuming previous outputs, new outputs
/// locking the value to recipients. `id` is the SHA-256 of the serialized
/// transaction with the id field cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Vec<u8>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Build the mining-reward transaction paying `to`. `data` is arbitrary
    /// miner text carried in the coinbase input; empty picks a default.
    pub fn coinbase(to: &str, data: Vec<u8>) -> Result<Self> {
        let data = if data.is_empty() {
            format!("Coin to: {}", to).into_bytes()
        } else {
            data
        };

        let input = TxInput {
            prev_txid: Vec::new(),
            out_index: -1,
            signature: Vec::new(),
            pub_key: data,
        };
        let output = TxOutput::locked_to(SUBSIDY, to)?;

        let mut tx = Self {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.set_id();
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// SHA-256 of the serialized transaction with the id cleared. The id
    /// cannot hash itself.
    pub fn hash(&self) -> Vec<u8> {
        let mut copy = self.clone();
        copy.id = Vec::new();
        sha256(&copy.serialize())
    }

    pub fn set_id(&mut self) {
        self.id = self.hash();
    }

    /// Copy with every input's signature and public key cleared. This is
    /// the shape that gets hashed during signing and verification.
    pub fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_txid: input.prev_txid.clone(),
                out_index: input.out_index,
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();

        Self {
            id: self.id.clone(),
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Sign every input against the outputs it spends. `prev_txs` maps
    /// hex txid to the referenced transaction and must cover every input.
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&hex::encode(&input.prev_txid)) {
                return Err(Error::TxNotFound);
            }
        }

        let secp = Secp256k1::signing_only();
        let mut tx_copy = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let prev_tx = &prev_txs[&hex::encode(&tx_copy.inputs[index].prev_txid)];
            let out_index = tx_copy.inputs[index].out_index as usize;
            let prev_output = prev_tx.outputs.get(out_index).ok_or(Error::TxNotFound)?;

            // The signed hash commits to the lock of the output being spent
            tx_copy.inputs[index].signature = Vec::new();
            tx_copy.inputs[index].pub_key = prev_output.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash();
            tx_copy.inputs[index].pub_key = Vec::new();

            let message = Message::from_digest_slice(&tx_copy.id)?;
            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[index].signature = signature.serialize_compact().to_vec();
        }

        Ok(())
    }

    /// Check every input's signature. Returns `Ok(false)` on any failed or
    /// malformed signature; a missing previous transaction is a
    /// chain-integrity error.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&hex::encode(&input.prev_txid)) {
                return Err(Error::TxNotFound);
            }
        }

        let secp = Secp256k1::verification_only();
        let mut tx_copy = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let prev_tx = &prev_txs[&hex::encode(&input.prev_txid)];
            let prev_output = match prev_tx.outputs.get(input.out_index as usize) {
                Some(output) => output,
                None => return Ok(false),
            };

            // Reconstruct the exact hash that was signed
            tx_copy.inputs[index].signature = Vec::new();
            tx_copy.inputs[index].pub_key = prev_output.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash();
            tx_copy.inputs[index].pub_key = Vec::new();

            let message = Message::from_digest_slice(&tx_copy.id)?;

            // Signature is r || s with equal halves; public key is the
            // uncompressed X || Y concatenation
            let signature = match Signature::from_compact(&input.signature) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            };
            let mut sec1 = Vec::with_capacity(input.pub_key.len() + 1);
            sec1.push(0x04);
            sec1.extend_from_slice(&input.pub_key);
            let pub_key = match PublicKey::from_slice(&sec1) {
                Ok(key) => key,
                Err(_) => return Ok(false),
            };

            if secp.verify_ecdsa(&message, &signature, &pub_key).is_err() {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

impl Serializable for Transaction {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_var_bytes(buf, &self.id);
        write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(buf);
        }
        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(buf);
        }
    }

    fn read_from(reader: &mut dyn Read) -> Result<Self> {
        let id = read_var_bytes(reader)?;

        let input_count = read_varint(reader)? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(reader)?);
        }

        let output_count = read_varint(reader)? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(reader)?);
        }

        Ok(Self { id, inputs, outputs })
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", hex::encode(&self.id))?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "    Input {}:", i)?;
            writeln!(f, "      Previous txid: {}", hex::encode(&input.prev_txid))?;
            writeln!(f, "      Output index:  {}", input.out_index)?;
            writeln!(f, "      Signature:     {}", hex::encode(&input.signature))?;
            writeln!(f, "      PubKey:        {}", hex::encode(&input.pub_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "    Output {}:", i)?;
            writeln!(f, "      Value:   {}", output.value)?;
            writeln!(f, "      Script:  {}", hex::encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn prev_map(tx: &Transaction) -> HashMap<String, Transaction> {
        let mut map = HashMap::new();
        map.insert(hex::encode(&tx.id), tx.clone());
        map
    }

    /// Unsigned spend of `prev`'s first output, paying `to`
    fn spend(prev: &Transaction, owner: &Wallet, to: &str, amount: u64) -> Transaction {
        let input = TxInput {
            prev_txid: prev.id.clone(),
            out_index: 0,
            signature: Vec::new(),
            pub_key: owner.public_key.clone(),
        };
        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![TxOutput::locked_to(amount, to).unwrap()],
        };
        tx.set_id();
        tx
    }

    #[test]
    fn coinbase_shape() {
        let wallet = Wallet::generate();
        let tx = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();

        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs.len(), 1);
        assert!(tx.inputs[0].prev_txid.is_empty());
        assert_eq!(tx.inputs[0].out_index, -1);
        assert_eq!(tx.outputs[0].value, SUBSIDY);
        assert_eq!(tx.outputs[0].pub_key_hash, wallet.pub_key_hash());
    }

    #[test]
    fn coinbase_default_data() {
        let wallet = Wallet::generate();
        let address = wallet.address();
        let tx = Transaction::coinbase(&address, Vec::new()).unwrap();
        assert_eq!(
            tx.inputs[0].pub_key,
            format!("Coin to: {}", address).into_bytes()
        );
    }

    #[test]
    fn id_matches_hash_of_cleared_serialization() {
        let wallet = Wallet::generate();
        let tx = Transaction::coinbase(&wallet.address(), b"genesis data".to_vec()).unwrap();

        let mut cleared = tx.clone();
        cleared.id = Vec::new();
        assert_eq!(tx.id, sha256(&cleared.serialize()));
    }

    #[test]
    fn serialization_round_trip() {
        let wallet = Wallet::generate();
        let tx = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();

        let decoded = Transaction::deserialize(&tx.serialize()).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn trimmed_copy_clears_input_material() {
        let owner = Wallet::generate();
        let recipient = Wallet::generate();
        let prev = Transaction::coinbase(&owner.address(), Vec::new()).unwrap();
        let mut tx = spend(&prev, &owner, &recipient.address(), 40);
        tx.sign(&owner.secret_key, &prev_map(&prev)).unwrap();

        let trimmed = tx.trimmed_copy();
        assert!(trimmed.inputs[0].signature.is_empty());
        assert!(trimmed.inputs[0].pub_key.is_empty());
        assert_eq!(trimmed.outputs, tx.outputs);
    }

    #[test]
    fn sign_then_verify() {
        let owner = Wallet::generate();
        let recipient = Wallet::generate();
        let prev = Transaction::coinbase(&owner.address(), Vec::new()).unwrap();

        let mut tx = spend(&prev, &owner, &recipient.address(), 60);
        let prevs = prev_map(&prev);
        tx.sign(&owner.secret_key, &prevs).unwrap();

        assert_eq!(tx.inputs[0].signature.len(), 64);
        assert!(tx.verify(&prevs).unwrap());
    }

    #[test]
    fn tampered_output_fails_verification() {
        let owner = Wallet::generate();
        let recipient = Wallet::generate();
        let prev = Transaction::coinbase(&owner.address(), Vec::new()).unwrap();

        let mut tx = spend(&prev, &owner, &recipient.address(), 60);
        let prevs = prev_map(&prev);
        tx.sign(&owner.secret_key, &prevs).unwrap();

        tx.outputs[0].value = 99;
        assert!(!tx.verify(&prevs).unwrap());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let owner = Wallet::generate();
        let thief = Wallet::generate();
        let recipient = Wallet::generate();
        let prev = Transaction::coinbase(&owner.address(), Vec::new()).unwrap();

        let mut tx = spend(&prev, &owner, &recipient.address(), 60);
        let prevs = prev_map(&prev);
        // Signed by a key that does not own the referenced output
        tx.sign(&thief.secret_key, &prevs).unwrap();

        assert!(!tx.verify(&prevs).unwrap());
    }

    #[test]
    fn missing_prev_tx_is_integrity_error() {
        let owner = Wallet::generate();
        let recipient = Wallet::generate();
        let prev = Transaction::coinbase(&owner.address(), Vec::new()).unwrap();
        let tx = spend(&prev, &owner, &recipient.address(), 10);

        let empty = HashMap::new();
        assert!(matches!(tx.verify(&empty), Err(Error::TxNotFound)));
    }

    #[test]
    fn coinbase_verifies_unconditionally() {
        let wallet = Wallet::generate();
        let tx = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        assert!(tx.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn tx_outputs_round_trip_preserves_indices() {
        let record = TxOutputs {
            outputs: vec![
                (0, TxOutput::new(25, vec![1u8; 20])),
                (2, TxOutput::new(75, vec![2u8; 20])),
            ],
        };
        let decoded = TxOutputs::deserialize(&record.serialize()).unwrap();
        assert_eq!(record, decoded);
    }
}
