// Block data structure

use crate::core::merkle::merkle_root;
use crate::core::serialize::{preallocate, read_count, read_hash, read_i64, read_u64, write_varint};
use crate::core::{Hash256, Serializable, Transaction};
use crate::error::Result;
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

/// Block - one step of the ledger
///
/// `hash` stays zero until proof-of-work succeeds. The genesis block has height 0 and a zero
/// `prev_hash`; every other block sits one above its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// Transactions in authored order
    pub transactions: Vec<Transaction>,
    pub prev_hash: Hash256,
    pub hash: Hash256,
    pub nonce: u64,
    pub height: u64,
}

impl Block {
    /// Create a block that has not been mined yet
    pub fn unmined(transactions: Vec<Transaction>, prev_hash: Hash256, height: u64) -> Self {
        Self {
            timestamp: now(),
            transactions,
            prev_hash,
            hash: Hash256::zero(),
            nonce: 0,
            height,
        }
    }

    /// Merkle digest of the block's transactions
    pub fn hash_transactions(&self) -> Hash256 {
        merkle_root(&self.transactions)
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.timestamp.to_le_bytes());

        write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.serialize());
        }

        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf
    }

    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let timestamp = read_i64(reader)?;

        let tx_count = read_count(reader)?;
        let mut transactions = preallocate(tx_count);
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(reader)?);
        }

        Ok(Self {
            timestamp,
            transactions,
            prev_hash: read_hash(reader)?,
            hash: read_hash(reader)?,
            nonce: read_u64(reader)?,
            height: read_u64(reader)?,
        })
    }
}
