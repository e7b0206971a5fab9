// UTXO (Unspent Transaction Output) set management

use crate::core::serialize::{preallocate, read_count, read_u32, write_varint};
use crate::core::{Block, Hash256, PubKeyHash, Serializable, TxOutput};
use crate::error::{ChainError, Result};
use crate::storage::Ledger;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Batch, Db, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;

const CHAINSTATE_TREE: &str = "chainstate";

/// An unspent output together with its offset in the transaction that created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub index: u32,
    pub output: TxOutput,
}

/// Outputs of one transaction that no confirmed input references yet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoEntry {
    pub outputs: Vec<UnspentOutput>,
}

impl UtxoEntry {
    /// Entry holding every output of a fresh transaction
    pub fn from_outputs(outputs: &[TxOutput]) -> Self {
        Self {
            outputs: outputs
                .iter()
                .enumerate()
                .map(|(index, output)| UnspentOutput {
                    index: index as u32,
                    output: output.clone(),
                })
                .collect(),
        }
    }

    /// Remove the output at `index`; false if it was not in the entry
    pub fn spend(&mut self, index: u32) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|unspent| unspent.index != index);
        self.outputs.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Serializable for UtxoEntry {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, self.outputs.len() as u64);
        for unspent in &self.outputs {
            buf.extend_from_slice(&unspent.index.to_le_bytes());
            unspent.output.write_to(&mut buf);
        }
        buf
    }

    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let count = read_count(reader)?;
        let mut outputs = preallocate(count);
        for _ in 0..count {
            outputs.push(UnspentOutput {
                index: read_u32(reader)?,
                output: TxOutput::from_reader(reader)?,
            });
        }
        Ok(Self { outputs })
    }
}

/// Derived index from transaction ID to its still-unspent outputs
///
/// Entries are visited in ascending transaction-ID byte order and, within an entry, in
/// ascending output index; output selection relies on that order.
#[derive(Clone)]
pub struct UtxoSet {
    chainstate: Tree,
}

impl UtxoSet {
    pub fn new(db: &Db) -> Result<Self> {
        Ok(Self {
            chainstate: db.open_tree(CHAINSTATE_TREE)?,
        })
    }

    /// Rebuild the whole index from the best chain, replacing the old contents in one batch
    ///
    /// Returns the number of entries written.
    pub fn reindex(&self, ledger: &Ledger) -> Result<usize> {
        let unspent = Self::collect_unspent(ledger)?;

        let mut batch = Batch::default();
        for key in self.chainstate.iter().keys() {
            batch.remove(key?);
        }
        for (txid, entry) in &unspent {
            batch.insert(&txid.as_bytes()[..], entry.serialize());
        }

        self.chainstate.apply_batch(batch)?;
        self.chainstate.flush()?;

        log::info!("Reindexed UTXO set: {} transactions with unspent outputs", unspent.len());
        Ok(unspent.len())
    }

    /// Replay the chain, collecting referenced offsets over the whole walk before filtering
    fn collect_unspent(ledger: &Ledger) -> Result<BTreeMap<Hash256, UtxoEntry>> {
        let mut spent: HashMap<Hash256, HashSet<i32>> = HashMap::new();
        let mut created: Vec<(Hash256, Vec<TxOutput>)> = Vec::new();

        for block in ledger.iter()? {
            for tx in block?.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.entry(input.prev_tx_id).or_default().insert(input.prev_index);
                    }
                }
                created.push((tx.id, tx.outputs));
            }
        }

        let mut unspent = BTreeMap::new();
        for (txid, outputs) in created {
            let spent_offsets = spent.get(&txid);
            let mut entry = UtxoEntry::from_outputs(&outputs);
            entry.outputs.retain(|unspent| {
                spent_offsets.is_none_or(|offsets| !offsets.contains(&(unspent.index as i32)))
            });

            if !entry.is_empty() {
                unspent.insert(txid, entry);
            }
        }

        Ok(unspent)
    }

    /// Incrementally update the index with a block just appended at the tip
    ///
    /// Runs as one transaction; an input referencing an output missing from the index aborts
    /// the whole update with `Corrupted`, leaving the index untouched.
    pub fn apply(&self, block: &Block) -> Result<()> {
        self.chainstate.transaction(|tree| -> ConflictableTransactionResult<(), ChainError> {
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        let key = &input.prev_tx_id.as_bytes()[..];
                        let missing = || {
                            ConflictableTransactionError::Abort(ChainError::Corrupted(format!(
                                "block {} spends {}:{} which is not in the UTXO set",
                                block.hash, input.prev_tx_id, input.prev_index
                            )))
                        };

                        let data = tree.get(key)?.ok_or_else(missing)?;
                        let mut entry = UtxoEntry::deserialize(&data).map_err(ConflictableTransactionError::Abort)?;

                        let index = u32::try_from(input.prev_index).map_err(|_| missing())?;
                        if !entry.spend(index) {
                            return Err(missing());
                        }

                        if entry.is_empty() {
                            tree.remove(key)?;
                        } else {
                            tree.insert(key, entry.serialize())?;
                        }
                    }
                }

                let entry = UtxoEntry::from_outputs(&tx.outputs);
                tree.insert(&tx.id.as_bytes()[..], entry.serialize())?;
            }
            Ok(())
        })?;

        self.chainstate.flush()?;
        log::debug!("Applied block {} to UTXO set", block.hash);
        Ok(())
    }

    /// All entries in key order
    pub fn entries(&self) -> Result<Vec<(Hash256, UtxoEntry)>> {
        self.chainstate
            .iter()
            .map(|item| {
                let (key, value) = item?;
                Ok((Hash256::from_slice(&key)?, UtxoEntry::deserialize(&value)?))
            })
            .collect()
    }

    /// Greedy first-fit selection of outputs locked to `pub_key_hash`
    ///
    /// Stops as soon as the running total reaches `amount`. A returned total below `amount`
    /// means the owner cannot afford it; it then equals the owner's whole balance.
    pub fn find_spendable(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash256, Vec<u32>>)> {
        let mut accumulated = 0u64;
        let mut selection: BTreeMap<Hash256, Vec<u32>> = BTreeMap::new();

        'entries: for (txid, entry) in self.entries()? {
            for unspent in entry.outputs {
                if accumulated >= amount {
                    break 'entries;
                }
                if unspent.output.is_locked_with(pub_key_hash) {
                    accumulated += unspent.output.value;
                    selection.entry(txid).or_default().push(unspent.index);
                }
            }
        }

        Ok((accumulated, selection))
    }

    /// Every unspent output locked to `pub_key_hash`
    pub fn find_utxos(&self, pub_key_hash: &PubKeyHash) -> Result<Vec<(Hash256, UnspentOutput)>> {
        let mut found = Vec::new();
        for (txid, entry) in self.entries()? {
            found.extend(
                entry
                    .outputs
                    .into_iter()
                    .filter(|unspent| unspent.output.is_locked_with(pub_key_hash))
                    .map(|unspent| (txid, unspent)),
            );
        }
        Ok(found)
    }

    /// Sum of every unspent output locked to `pub_key_hash`
    pub fn balance(&self, pub_key_hash: &PubKeyHash) -> Result<u64> {
        Ok(self
            .find_utxos(pub_key_hash)?
            .iter()
            .map(|(_, unspent)| unspent.output.value)
            .sum())
    }

    /// Number of transactions that still have unspent outputs
    pub fn count_transactions(&self) -> usize {
        self.chainstate.len()
    }

    /// Whether `txid:index` is currently unspent
    pub fn is_unspent(&self, txid: &Hash256, index: i32) -> Result<bool> {
        let Ok(index) = u32::try_from(index) else {
            return Ok(false);
        };
        match self.chainstate.get(txid.as_bytes())? {
            Some(data) => Ok(UtxoEntry::deserialize(&data)?
                .outputs
                .iter()
                .any(|unspent| unspent.index == index)),
            None => Ok(false),
        }
    }
}
