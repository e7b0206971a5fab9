// Block ledger using sled

use crate::consensus::{ProofOfWork, TipChoice, choose_tip};
use crate::core::{Block, Hash256, PubKeyHash, Serializable, Transaction};
use crate::error::{ChainError, Result};
use secp256k1::SecretKey;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};

const BLOCKS_TREE: &str = "blocks";

/// Reserved key holding the hash of the current tip
const TIP_KEY: &[u8] = b"l";

/// Memo carried by the genesis coinbase
pub const GENESIS_MEMO: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// What `append` did with a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Already stored; nothing changed
    Known,
    /// Stored, tip unchanged
    Stored,
    /// Stored and became the new tip
    NewTip,
}

/// Hash-addressed block store with a movable tip
#[derive(Clone)]
pub struct Ledger {
    blocks: Tree,
    pow: ProofOfWork,
}

impl Ledger {
    /// Open the blocks tree without checking that a chain exists
    pub fn load(db: &Db) -> Result<Self> {
        Ok(Self {
            blocks: db.open_tree(BLOCKS_TREE)?,
            pow: ProofOfWork::new(),
        })
    }

    /// Open an existing chain
    pub fn open(db: &Db) -> Result<Self> {
        let ledger = Self::load(db)?;
        if !ledger.has_chain()? {
            return Err(ChainError::NoChain);
        }
        Ok(ledger)
    }

    /// Create a new chain whose genesis reward goes to `to`
    pub fn create(db: &Db, to: &PubKeyHash) -> Result<Self> {
        let ledger = Self::load(db)?;
        ledger.create_genesis(to)?;
        Ok(ledger)
    }

    /// Use a different proof of work for mining and self-checks
    pub fn with_pow(mut self, pow: ProofOfWork) -> Self {
        self.pow = pow;
        self
    }

    pub fn pow(&self) -> ProofOfWork {
        self.pow
    }

    pub fn has_chain(&self) -> Result<bool> {
        Ok(self.blocks.contains_key(TIP_KEY)?)
    }

    /// Mine and store the genesis block
    pub fn create_genesis(&self, to: &PubKeyHash) -> Result<Block> {
        if self.has_chain()? {
            return Err(ChainError::ChainExists);
        }

        let coinbase = Transaction::coinbase(to, GENESIS_MEMO);
        let genesis = self.pow.mine(vec![coinbase], Hash256::zero(), 0)?;
        self.append(&genesis)?;

        log::info!("Created genesis block {}", genesis.hash);
        Ok(genesis)
    }

    /// Store a block, moving the tip if the fork-choice rule prefers it
    ///
    /// Block body and tip pointer are written in one transaction. Re-appending a stored block
    /// is a no-op.
    pub fn append(&self, block: &Block) -> Result<AppendOutcome> {
        let key = block.hash.as_bytes().to_vec();
        let bytes = block.serialize();

        let outcome = self.blocks.transaction(|tx| -> ConflictableTransactionResult<AppendOutcome, ChainError> {
            if tx.get(key.as_slice())?.is_some() {
                return Ok(AppendOutcome::Known);
            }
            tx.insert(key.as_slice(), bytes.as_slice())?;

            let choice = match tx.get(TIP_KEY)? {
                Some(tip_hash) => {
                    let tip_bytes = tx.get(&tip_hash)?.ok_or_else(|| {
                        ConflictableTransactionError::Abort(ChainError::Corrupted(
                            "tip points at a missing block".to_string(),
                        ))
                    })?;
                    let tip = Block::deserialize(&tip_bytes).map_err(ConflictableTransactionError::Abort)?;
                    choose_tip(&tip, block)
                }
                None => TipChoice::Switch,
            };

            if choice == TipChoice::Switch {
                tx.insert(TIP_KEY, key.as_slice())?;
                Ok(AppendOutcome::NewTip)
            } else {
                Ok(AppendOutcome::Stored)
            }
        })?;

        if outcome != AppendOutcome::Known {
            self.blocks.flush()?;
        }

        log::debug!("Append {} at height {}: {:?}", block.hash, block.height, outcome);
        Ok(outcome)
    }

    /// Hash of the current tip
    pub fn tip_hash(&self) -> Result<Hash256> {
        match self.blocks.get(TIP_KEY)? {
            Some(data) => Hash256::from_slice(&data),
            None => Err(ChainError::NoChain),
        }
    }

    pub fn tip(&self) -> Result<Block> {
        self.get_block(&self.tip_hash()?)
    }

    /// Height of the tip block
    pub fn best_height(&self) -> Result<u64> {
        Ok(self.tip()?.height)
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        match self.blocks.get(hash.as_bytes())? {
            Some(data) => Block::deserialize(&data),
            None => Err(ChainError::BlockNotFound(*hash)),
        }
    }

    /// Check if a block exists
    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.blocks.contains_key(hash.as_bytes())?)
    }

    /// Walk from the tip back to genesis
    pub fn iter(&self) -> Result<LedgerIter> {
        Ok(LedgerIter {
            blocks: self.blocks.clone(),
            next_hash: self.tip_hash()?,
        })
    }

    /// Hashes of every block on the best chain, tip first
    pub fn block_hashes(&self) -> Result<Vec<Hash256>> {
        self.iter()?.map(|block| block.map(|b| b.hash)).collect()
    }

    /// Find a confirmed transaction by ID
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter()? {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(ChainError::TransactionNotFound(*id))
    }

    /// Confirmed transactions referenced by `tx`'s inputs; unknown references are left out
    pub fn referenced_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash256, Transaction>> {
        let mut wanted: HashSet<Hash256> = tx
            .inputs
            .iter()
            .filter(|input| !input.is_coinbase())
            .map(|input| input.prev_tx_id)
            .collect();
        let mut found = HashMap::new();

        if wanted.is_empty() {
            return Ok(found);
        }

        for block in self.iter()? {
            for prev in block?.transactions {
                if wanted.remove(&prev.id) {
                    found.insert(prev.id, prev);
                }
            }
            if wanted.is_empty() {
                break;
            }
        }

        Ok(found)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev_txs = self.referenced_transactions(tx)?;
        tx.sign(secret_key, &prev_txs)
    }

    /// Signature check against the confirmed chain; false means the transaction must be rejected
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.referenced_transactions(tx)?;
        Ok(tx.verify(&prev_txs))
    }

    /// Mine a block with `transactions` on top of the tip and append it
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(ChainError::InvalidTransaction(tx.id));
            }
        }

        let tip = self.tip()?;
        let block = self.pow.mine(transactions, tip.hash, tip.height + 1)?;
        if !self.pow.validate(&block) {
            return Err(ChainError::Corrupted(format!("mined block {} fails validation", block.hash)));
        }

        self.append(&block)?;
        log::info!("Mined block {} at height {}", block.hash, block.height);
        Ok(block)
    }
}

/// Lazy walk from the tip to genesis; a fresh iterator is needed for every walk
pub struct LedgerIter {
    blocks: Tree,
    next_hash: Hash256,
}

impl Iterator for LedgerIter {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_hash.is_zero() {
            return None;
        }

        let result = match self.blocks.get(self.next_hash.as_bytes()) {
            Ok(Some(data)) => Block::deserialize(&data),
            Ok(None) => Err(ChainError::BlockNotFound(self.next_hash)),
            Err(e) => Err(e.into()),
        };

        self.next_hash = match &result {
            Ok(block) => block.prev_hash,
            Err(_) => Hash256::zero(),
        };

        Some(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput, hash160};
    use secp256k1::{PublicKey, Secp256k1};

    pub(crate) fn memory_db() -> Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    pub(crate) fn easy_ledger(db: &Db, to: &PubKeyHash) -> Ledger {
        let ledger = Ledger::load(db).unwrap().with_pow(ProofOfWork::with_difficulty(4));
        ledger.create_genesis(to).unwrap();
        ledger
    }

    fn coinbase_block(ledger: &Ledger, parent: &Block, memo: &str) -> Block {
        ledger
            .pow()
            .mine(vec![Transaction::coinbase(&[9; 20], memo)], parent.hash, parent.height + 1)
            .unwrap()
    }

    #[test]
    fn test_create_and_open() {
        let db = memory_db();
        assert!(matches!(Ledger::open(&db), Err(ChainError::NoChain)));

        let ledger = easy_ledger(&db, &[1; 20]);
        assert_eq!(ledger.best_height().unwrap(), 0);

        let genesis = ledger.tip().unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.transactions[0].inputs[0].signature, GENESIS_MEMO.as_bytes());

        assert!(Ledger::open(&db).is_ok());
        assert!(matches!(ledger.create_genesis(&[1; 20]), Err(ChainError::ChainExists)));
    }

    #[test]
    fn test_store_and_get_block() {
        let db = memory_db();
        let ledger = easy_ledger(&db, &[1; 20]);
        let block = coinbase_block(&ledger, &ledger.tip().unwrap(), "one");

        assert_eq!(ledger.append(&block).unwrap(), AppendOutcome::NewTip);
        assert_eq!(ledger.get_block(&block.hash).unwrap(), block);
        assert!(ledger.has_block(&block.hash).unwrap());

        let missing = Hash256::new([0xee; 32]);
        assert!(matches!(ledger.get_block(&missing), Err(ChainError::BlockNotFound(h)) if h == missing));
    }

    #[test]
    fn test_reappend_is_noop() {
        let db = memory_db();
        let ledger = easy_ledger(&db, &[1; 20]);
        let block = coinbase_block(&ledger, &ledger.tip().unwrap(), "one");

        ledger.append(&block).unwrap();
        assert_eq!(ledger.append(&block).unwrap(), AppendOutcome::Known);
        assert_eq!(ledger.tip_hash().unwrap(), block.hash);
        assert_eq!(ledger.block_hashes().unwrap().len(), 2);
    }

    #[test]
    fn test_fork_choice_by_height() {
        let db = memory_db();
        let ledger = easy_ledger(&db, &[1; 20]);
        let genesis = ledger.tip().unwrap();

        let a1 = coinbase_block(&ledger, &genesis, "a1");
        let b1 = coinbase_block(&ledger, &genesis, "b1");

        assert_eq!(ledger.append(&a1).unwrap(), AppendOutcome::NewTip);
        // Same height: the existing tip stays
        assert_eq!(ledger.append(&b1).unwrap(), AppendOutcome::Stored);
        assert_eq!(ledger.tip_hash().unwrap(), a1.hash);

        // Extending the other branch makes it strictly higher
        let b2 = coinbase_block(&ledger, &b1, "b2");
        assert_eq!(ledger.append(&b2).unwrap(), AppendOutcome::NewTip);
        assert_eq!(ledger.tip_hash().unwrap(), b2.hash);
        assert_eq!(ledger.best_height().unwrap(), 2);

        let walk = ledger.block_hashes().unwrap();
        assert_eq!(walk, vec![b2.hash, b1.hash, genesis.hash]);
    }

    #[test]
    fn test_lower_block_does_not_move_tip() {
        let db = memory_db();
        let ledger = easy_ledger(&db, &[1; 20]);
        let genesis = ledger.tip().unwrap();
        let a1 = coinbase_block(&ledger, &genesis, "a1");
        let a2 = coinbase_block(&ledger, &a1, "a2");

        // Out of order, as during sync: tip first
        assert_eq!(ledger.append(&a2).unwrap(), AppendOutcome::NewTip);
        assert_eq!(ledger.append(&a1).unwrap(), AppendOutcome::Stored);
        assert_eq!(ledger.tip_hash().unwrap(), a2.hash);
        assert_eq!(ledger.iter().unwrap().count(), 3);
    }

    #[test]
    fn test_iterator_is_fresh_each_call() {
        let db = memory_db();
        let ledger = easy_ledger(&db, &[1; 20]);
        let block = coinbase_block(&ledger, &ledger.tip().unwrap(), "one");
        ledger.append(&block).unwrap();

        let mut first = ledger.iter().unwrap();
        assert_eq!(first.next().unwrap().unwrap().hash, block.hash);
        assert!(first.next().unwrap().unwrap().is_genesis());
        assert!(first.next().is_none());

        assert_eq!(ledger.iter().unwrap().count(), 2);
    }

    #[test]
    fn test_sign_verify_and_mine() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[3; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret).serialize().to_vec();
        let owner = hash160(&public);

        let db = memory_db();
        let ledger = easy_ledger(&db, &owner);
        let genesis_tx = ledger.tip().unwrap().transactions[0].clone();
        assert_eq!(ledger.find_transaction(&genesis_tx.id).unwrap(), genesis_tx);

        let mut tx = Transaction::new(
            vec![TxInput::new(genesis_tx.id, 0, public)],
            vec![TxOutput::new(genesis_tx.outputs[0].value, [2; 20])],
        );
        assert!(!ledger.verify_transaction(&tx).unwrap());
        assert!(matches!(ledger.mine_block(vec![tx.clone()]), Err(ChainError::InvalidTransaction(_))));

        ledger.sign_transaction(&mut tx, &secret).unwrap();
        assert!(ledger.verify_transaction(&tx).unwrap());

        let block = ledger.mine_block(vec![tx.clone(), Transaction::coinbase(&owner, "")]).unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(ledger.tip_hash().unwrap(), block.hash);
        assert_eq!(ledger.find_transaction(&tx.id).unwrap(), tx);
    }

    #[test]
    fn test_missing_transaction() {
        let db = memory_db();
        let ledger = easy_ledger(&db, &[1; 20]);
        let id = Hash256::new([4; 32]);
        assert!(matches!(ledger.find_transaction(&id), Err(ChainError::TransactionNotFound(_))));
    }
}
