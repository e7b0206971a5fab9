// Minimal proof-of-work ledger node

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::cli::{Cli, CliHandler};
pub use crate::config::NodeConfig;
pub use crate::consensus::{BlockValidator, ProofOfWork, ValidationError};
pub use crate::core::{Block, Hash256, Transaction, TxInput, TxOutput};
pub use crate::error::{ChainError, Result};
pub use crate::network::{Message, Node};
pub use crate::storage::{Ledger, Storage, UtxoSet};
pub use crate::wallet::{Address, KeyPair, Keystore};
