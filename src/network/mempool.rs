// Pending transactions

use crate::core::{Hash256, Transaction};
use std::collections::BTreeMap;

/// Unconfirmed transactions keyed by ID
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: BTreeMap<Hash256, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction; returns false if it was already pending
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.transactions.contains_key(&tx.id) {
            return false;
        }
        self.transactions.insert(tx.id, tx);
        true
    }

    pub fn get(&self, id: &Hash256) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn remove(&mut self, id: &Hash256) -> Option<Transaction> {
        self.transactions.remove(id)
    }

    /// Pending transactions in ID order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
