// Transaction builder

use crate::core::{PubKeyHash, Transaction, TxInput, TxOutput};
use crate::error::{ChainError, Result};
use crate::storage::{Ledger, UtxoSet};
use crate::wallet::KeyPair;

/// Builds transfers against the UTXO set
pub struct TransactionBuilder<'a> {
    utxo_set: &'a UtxoSet,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(utxo_set: &'a UtxoSet) -> Self {
        Self { utxo_set }
    }

    /// Build an unsigned transfer of `amount` from `sender` to `to`
    ///
    /// One input per selected output, the payment output first and a change output back to the
    /// sender when the selection overshoots.
    pub fn build_transfer(&self, sender: &KeyPair, to: &PubKeyHash, amount: u64) -> Result<Transaction> {
        let from = sender.pub_key_hash();
        let (accumulated, selection) = self.utxo_set.find_spendable(&from, amount)?;

        if accumulated < amount {
            return Err(ChainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let pub_key = sender.pub_key_bytes();
        let inputs: Vec<TxInput> = selection
            .into_iter()
            .flat_map(|(txid, indices)| {
                let pub_key = pub_key.clone();
                indices
                    .into_iter()
                    .map(move |index| TxInput::new(txid, index as i32, pub_key.clone()))
            })
            .collect();

        let mut outputs = vec![TxOutput::new(amount, *to)];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, from));
        }

        Ok(Transaction::new(inputs, outputs))
    }

    /// Build a transfer and sign it against the confirmed chain
    pub fn build_signed(
        &self,
        ledger: &Ledger,
        sender: &KeyPair,
        to: &PubKeyHash,
        amount: u64,
    ) -> Result<Transaction> {
        let mut tx = self.build_transfer(sender, to, amount)?;
        ledger.sign_transaction(&mut tx, &sender.secret_key)?;
        log::debug!("Built transaction {} paying {} with {} inputs", tx.id, amount, tx.inputs.len());
        Ok(tx)
    }
}
