// Merkle summary of a block's transaction list

use crate::core::{Hash256, Serializable, Transaction, sha256};

/// Root of the Merkle tree built over the serialized transactions, in the given order
///
/// Leaves are SHA256 of each serialized transaction. Whenever a level has an odd number of
/// nodes its last node is duplicated, so a single transaction still hashes once with itself.
pub fn merkle_root(transactions: &[Transaction]) -> Hash256 {
    let leaves: Vec<Vec<u8>> = transactions.iter().map(|tx| tx.serialize()).collect();
    merkle_root_of(&leaves)
}

/// Root over arbitrary leaf data
pub fn merkle_root_of<T: AsRef<[u8]>>(leaves: &[T]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::zero();
    }

    let mut level: Vec<Hash256> = leaves.iter().map(|leaf| sha256(leaf.as_ref())).collect();

    loop {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| {
                let mut combined = Vec::with_capacity(64);
                combined.extend_from_slice(pair[0].as_bytes());
                combined.extend_from_slice(pair[1].as_bytes());
                sha256(&combined)
            })
            .collect();

        if level.len() == 1 {
            return level[0];
        }
    }
}
