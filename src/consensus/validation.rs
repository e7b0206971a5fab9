// Block validation and fork choice

use crate::consensus::pow::ProofOfWork;
use crate::core::Block;

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Block hash doesn't match its contents or doesn't meet the PoW target
    InvalidProofOfWork,
    /// Block has no transactions
    NoTransactions,
    /// Block has no coinbase transaction
    MissingCoinbase,
    /// More than one coinbase transaction
    MultipleCoinbase,
    /// Transaction has no inputs or outputs
    EmptyTransaction,
    /// Transaction ID doesn't match its contents
    InvalidTransactionId,
    /// Height isn't exactly one above the parent (or zero for genesis)
    InvalidHeight { expected: u64, found: u64 },
    /// Parent handed in doesn't match the block's prev hash
    ParentMismatch,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ValidationError::InvalidProofOfWork => write!(f, "Invalid proof of work"),
            ValidationError::NoTransactions => write!(f, "Block has no transactions"),
            ValidationError::MissingCoinbase => write!(f, "Missing coinbase transaction"),
            ValidationError::MultipleCoinbase => write!(f, "Multiple coinbase transactions"),
            ValidationError::EmptyTransaction => write!(f, "Empty transaction"),
            ValidationError::InvalidTransactionId => write!(f, "Transaction ID doesn't match contents"),
            ValidationError::InvalidHeight { expected, found } => {
                write!(f, "Invalid height: expected {}, found {}", expected, found)
            }
            ValidationError::ParentMismatch => write!(f, "Parent doesn't match prev hash"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Block validator
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockValidator {
    pow: ProofOfWork,
}

impl BlockValidator {
    /// Validator at the process-wide difficulty
    pub fn new() -> Self {
        Self::with_pow(ProofOfWork::new())
    }

    pub fn with_pow(pow: ProofOfWork) -> Self {
        Self { pow }
    }

    /// Validate a block received from elsewhere
    ///
    /// The height rule is only checked when the parent is known locally; blocks fetched during
    /// sync arrive tip first, before their ancestors.
    pub fn validate_block(&self, block: &Block, parent: Option<&Block>) -> Result<(), ValidationError> {
        if !self.pow.validate(block) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        if block.transactions.is_empty() {
            return Err(ValidationError::NoTransactions);
        }

        match block.transactions.iter().filter(|tx| tx.is_coinbase()).count() {
            0 => return Err(ValidationError::MissingCoinbase),
            1 => {}
            _ => return Err(ValidationError::MultipleCoinbase),
        }

        for tx in &block.transactions {
            if tx.inputs.is_empty() || tx.outputs.is_empty() {
                return Err(ValidationError::EmptyTransaction);
            }
            if tx.id != tx.hash() {
                return Err(ValidationError::InvalidTransactionId);
            }
        }

        if block.is_genesis() && block.height != 0 {
            return Err(ValidationError::InvalidHeight { expected: 0, found: block.height });
        }

        if let Some(parent) = parent {
            if parent.hash != block.prev_hash {
                return Err(ValidationError::ParentMismatch);
            }
            let expected = parent.height + 1;
            if block.height != expected {
                return Err(ValidationError::InvalidHeight { expected, found: block.height });
            }
        }

        Ok(())
    }
}

/// Outcome of the fork-choice rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipChoice {
    Keep,
    Switch,
}

/// Fork choice: the candidate becomes the tip only if it is strictly higher; ties keep the
/// current tip
pub fn choose_tip(current: &Block, candidate: &Block) -> TipChoice {
    if candidate.height > current.height {
        TipChoice::Switch
    } else {
        TipChoice::Keep
    }
}
