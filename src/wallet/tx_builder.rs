// Builds spendable transactions against the UTXO index

use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{Error, Result};
use crate::storage::UtxoSet;
use crate::wallet::Wallet;

/// Assemble and sign a transfer of `amount` from `wallet` to the `to`
/// address: select unspent outputs, reference them as inputs, pay the
/// recipient, and return any excess to the sender as change.
pub fn new_utxo_transaction(
    wallet: &Wallet,
    to: &str,
    amount: u64,
    utxo_set: &UtxoSet,
) -> Result<Transaction> {
    let pub_key_hash = wallet.pub_key_hash();
    let (accumulated, selection) = utxo_set.find_spendable_outputs(&pub_key_hash, amount)?;

    if accumulated < amount {
        return Err(Error::InsufficientFunds {
            have: accumulated,
            need: amount,
        });
    }

    let mut inputs = Vec::new();
    for (txid_hex, indices) in selection {
        let prev_txid = hex::decode(&txid_hex)
            .map_err(|e| Error::Decode(format!("invalid txid in selection: {}", e)))?;
        for out_index in indices {
            inputs.push(TxInput {
                prev_txid: prev_txid.clone(),
                out_index,
                signature: Vec::new(),
                pub_key: wallet.public_key.clone(),
            });
        }
    }

    let mut outputs = vec![TxOutput::locked_to(amount, to)?];
    if accumulated > amount {
        outputs.push(TxOutput::new(accumulated - amount, pub_key_hash));
    }

    let mut tx = Transaction {
        id: Vec::new(),
        inputs,
        outputs,
    };
    tx.set_id();
    utxo_set.chain().sign_transaction(&mut tx, &wallet.secret_key)?;

    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Blockchain;

    #[test]
    fn builds_payment_with_change() {
        let miner = Wallet::generate();
        let recipient = Wallet::generate();
        let chain = Blockchain::open_temporary(&miner.address());
        let utxo = UtxoSet::new(&chain);
        utxo.reindex().unwrap();

        let tx = new_utxo_transaction(&miner, &recipient.address(), 30, &utxo).unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 30);
        assert_eq!(tx.outputs[0].pub_key_hash, recipient.pub_key_hash());
        assert_eq!(tx.outputs[1].value, 70);
        assert_eq!(tx.outputs[1].pub_key_hash, miner.pub_key_hash());
        assert!(chain.verify_transaction(&tx).unwrap());
    }

    #[test]
    fn exact_amount_creates_no_change() {
        let miner = Wallet::generate();
        let recipient = Wallet::generate();
        let chain = Blockchain::open_temporary(&miner.address());
        let utxo = UtxoSet::new(&chain);
        utxo.reindex().unwrap();

        // The genesis coinbase is worth exactly 100
        let tx = new_utxo_transaction(&miner, &recipient.address(), 100, &utxo).unwrap();
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 100);
    }

    #[test]
    fn insufficient_funds_is_reported() {
        let miner = Wallet::generate();
        let recipient = Wallet::generate();
        let chain = Blockchain::open_temporary(&miner.address());
        let utxo = UtxoSet::new(&chain);
        utxo.reindex().unwrap();

        let result = new_utxo_transaction(&miner, &recipient.address(), 5000, &utxo);
        assert!(matches!(
            result,
            Err(Error::InsufficientFunds { have: 100, need: 5000 })
        ));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let miner = Wallet::generate();
        let chain = Blockchain::open_temporary(&miner.address());
        let utxo = UtxoSet::new(&chain);
        utxo.reindex().unwrap();

        assert!(matches!(
            new_utxo_transaction(&miner, "not-an-address", 10, &utxo),
            Err(Error::InvalidAddress(_))
        ));
    }
}
