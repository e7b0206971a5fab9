// Error types for the node

use crate::core::Hash256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted chain data: {0}")]
    Corrupted(String),

    #[error("Nonce space exhausted while mining")]
    NonceExhausted,

    #[error("Block not found: {0}")]
    BlockNotFound(Hash256),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Hash256),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(Hash256),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Blockchain already exists")]
    ChainExists,

    #[error("No existing blockchain found, create one first")]
    NoChain,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ChainError {
    fn from(e: tokio::task::JoinError) -> Self {
        ChainError::Task(e.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        ChainError::Serialization(e.to_string())
    }
}

impl From<secp256k1::Error> for ChainError {
    fn from(e: secp256k1::Error) -> Self {
        ChainError::Wallet(e.to_string())
    }
}

impl From<sled::transaction::TransactionError<ChainError>> for ChainError {
    fn from(e: sled::transaction::TransactionError<ChainError>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => ChainError::Database(e),
        }
    }
}
