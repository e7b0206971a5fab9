// Storage layer for the block ledger and UTXO set

mod ledger;
mod utxo_set;

pub use ledger::{AppendOutcome, GENESIS_MEMO, Ledger, LedgerIter};
pub use utxo_set::{UnspentOutput, UtxoEntry, UtxoSet};

use crate::error::Result;
use sled::Db;
use std::path::Path;

/// Storage manager - one sled database holding the "blocks" and "chainstate" trees
#[derive(Clone)]
pub struct Storage {
    db: Db,
    pub utxo_set: UtxoSet,
}

impl Storage {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Create an in-memory storage (for testing)
    pub fn memory() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        let utxo_set = UtxoSet::new(&db)?;
        Ok(Self { db, utxo_set })
    }

    /// The underlying database, for opening or creating the ledger
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Open the existing chain
    pub fn ledger(&self) -> Result<Ledger> {
        Ledger::open(&self.db)
    }
}
