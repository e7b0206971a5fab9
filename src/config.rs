// Node configuration from the environment

use crate::error::{ChainError, Result};
use crate::wallet::Address;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_BOOTSTRAP: &str = "localhost:3000";

/// Mining starts once the mempool holds more than this many transactions
pub const DEFAULT_MINING_THRESHOLD: usize = 2;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub data_dir: PathBuf,
    /// Address this node listens on and advertises as `addr_from`
    pub listen_addr: String,
    /// First entry of the peer set
    pub bootstrap: String,
    /// Mining is enabled iff this is set
    pub mining_address: Option<Address>,
    pub mining_threshold: usize,
    pub io_timeout: Duration,
}

impl NodeConfig {
    /// Configuration for node `node_id` with every other setting at its default
    pub fn new(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            listen_addr: format!("localhost:{}", node_id),
            node_id,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bootstrap: DEFAULT_BOOTSTRAP.to_string(),
            mining_address: None,
            mining_threshold: DEFAULT_MINING_THRESHOLD,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Load from `NODE_ID`, `CHAIN_DATA_DIR` and `CHAIN_BOOTSTRAP`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let node_id = lookup("NODE_ID")
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ChainError::Config("NODE_ID env var is not set".to_string()))?;

        let mut config = Self::new(node_id.trim());
        if let Some(dir) = lookup("CHAIN_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(bootstrap) = lookup("CHAIN_BOOTSTRAP") {
            config.bootstrap = bootstrap;
        }

        Ok(config)
    }

    /// Enable mining with rewards paid to `address`
    pub fn with_miner(mut self, address: Address) -> Self {
        self.mining_address = Some(address);
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("blockchain_{}", self.node_id))
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.json", self.node_id))
    }

    /// Whether this node is the bootstrap node
    pub fn is_bootstrap(&self) -> bool {
        self.listen_addr == self.bootstrap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[("NODE_ID", "3001")])).unwrap();

        assert_eq!(config.listen_addr, "localhost:3001");
        assert_eq!(config.bootstrap, DEFAULT_BOOTSTRAP);
        assert_eq!(config.db_path(), PathBuf::from("./data/blockchain_3001"));
        assert_eq!(config.keystore_path(), PathBuf::from("./data/wallet_3001.json"));
        assert_eq!(config.mining_threshold, 2);
        assert!(config.mining_address.is_none());
        assert!(!config.is_bootstrap());
    }

    #[test]
    fn test_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("NODE_ID", "3000"),
            ("CHAIN_DATA_DIR", "/tmp/chain"),
            ("CHAIN_BOOTSTRAP", "localhost:3000"),
        ]))
        .unwrap();

        assert_eq!(config.db_path(), PathBuf::from("/tmp/chain/blockchain_3000"));
        assert!(config.is_bootstrap());
    }

    #[test]
    fn test_missing_node_id() {
        assert!(matches!(NodeConfig::from_lookup(lookup(&[])), Err(ChainError::Config(_))));
        assert!(matches!(
            NodeConfig::from_lookup(lookup(&[("NODE_ID", " ")])),
            Err(ChainError::Config(_))
        ));
    }

    #[test]
    fn test_with_miner() {
        let address = Address::from_pub_key_hash(&[3; 20]);
        let config = NodeConfig::new("3002").with_miner(address.clone());
        assert_eq!(config.mining_address, Some(address));
    }
}
