// CLI commands

use crate::config::NodeConfig;
use crate::core::Transaction;
use crate::error::{ChainError, Result};
use crate::network::{Node, submit_transaction};
use crate::storage::{Ledger, Storage};
use crate::wallet::{Address, Keystore, TransactionBuilder};
use clap::{Parser, Subcommand};
use std::sync::OnceLock;

#[derive(Parser)]
#[command(name = "pow-ledger")]
#[command(about = "Minimal proof-of-work ledger node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a blockchain and send the genesis reward to ADDRESS
    #[command(name = "createchain")]
    CreateChain {
        #[arg(long)]
        address: Address,
    },

    /// Print all the blocks of the blockchain
    #[command(name = "printchain")]
    PrintChain,

    /// Get balance of ADDRESS
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: Address,
    },

    /// Send AMOUNT of coins from FROM address to TO
    Send {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction on this node instead of handing it to the bootstrap node
        #[arg(long)]
        mine: bool,
    },

    /// Generate a new key pair and save it into the wallet file
    #[command(name = "createwallet")]
    CreateWallet,

    /// List all addresses from the wallet file
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Start a node with the ID specified in the NODE_ID env var
    #[command(name = "startnode")]
    StartNode {
        /// Enable mining and send rewards to this address
        #[arg(long)]
        miner: Option<Address>,
    },

    /// Rebuild the UTXO set
    #[command(name = "reindexutxo")]
    ReindexUtxo,
}

/// CLI handler
pub struct CliHandler {
    config: NodeConfig,
    /// Opened on first use; wallet commands never touch the database
    storage: OnceLock<Storage>,
}

impl CliHandler {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            storage: OnceLock::new(),
        }
    }

    /// Handle CLI command
    pub async fn handle(&self, cli: Cli) -> Result<()> {
        match cli.command {
            Commands::CreateChain { address } => self.create_chain(&address),
            Commands::PrintChain => self.print_chain(),
            Commands::GetBalance { address } => self.get_balance(&address),
            Commands::Send {
                from,
                to,
                amount,
                mine,
            } => self.send(&from, &to, amount, mine).await,
            Commands::CreateWallet => self.create_wallet(),
            Commands::ListAddresses => self.list_addresses(),
            Commands::StartNode { miner } => self.start_node(miner).await,
            Commands::ReindexUtxo => self.reindex_utxo(),
        }
    }

    fn open_storage(&self) -> Result<Storage> {
        if let Some(storage) = self.storage.get() {
            return Ok(storage.clone());
        }
        let storage = Storage::open(self.config.db_path())?;
        Ok(self.storage.get_or_init(|| storage).clone())
    }

    fn create_chain(&self, address: &Address) -> Result<()> {
        let storage = self.open_storage()?;
        let ledger = Ledger::create(storage.db(), &address.to_pub_key_hash()?)?;
        storage.utxo_set.reindex(&ledger)?;

        println!("Done!");
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let storage = self.open_storage()?;
        let ledger = storage.ledger()?;
        let pow = ledger.pow();

        for block in ledger.iter()? {
            let block = block?;
            println!("============ Block {} ============", block.hash);
            println!("Height: {}", block.height);
            println!("Prev. block: {}", block.prev_hash);
            println!("PoW: {}", pow.validate(&block));
            for tx in &block.transactions {
                print_transaction(tx);
            }
            println!();
        }
        Ok(())
    }

    fn get_balance(&self, address: &Address) -> Result<()> {
        let storage = self.open_storage()?;
        storage.ledger()?;
        let balance = storage.utxo_set.balance(&address.to_pub_key_hash()?)?;

        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    async fn send(&self, from: &Address, to: &Address, amount: u64, mine: bool) -> Result<()> {
        let storage = self.open_storage()?;
        let ledger = storage.ledger()?;

        let keystore = Keystore::load_or_default(self.config.keystore_path())?;
        let sender = keystore
            .get_keypair(from)
            .ok_or_else(|| ChainError::Wallet(format!("No key for {} in the wallet file", from)))?;

        let tx = TransactionBuilder::new(&storage.utxo_set).build_signed(
            &ledger,
            sender,
            &to.to_pub_key_hash()?,
            amount,
        )?;

        if mine {
            let coinbase = Transaction::coinbase(&sender.pub_key_hash(), "");
            let block = ledger.mine_block(vec![coinbase, tx])?;
            storage.utxo_set.apply(&block)?;
        } else {
            submit_transaction(&self.config, tx).await?;
        }

        println!("Success!");
        Ok(())
    }

    fn create_wallet(&self) -> Result<()> {
        let path = self.config.keystore_path();
        let mut keystore = Keystore::load_or_default(&path)?;
        let address = keystore.new_address();
        keystore.save(&path)?;

        println!("Your new address: {}", address);
        Ok(())
    }

    fn list_addresses(&self) -> Result<()> {
        let keystore = Keystore::load_or_default(self.config.keystore_path())?;
        for address in keystore.list_addresses() {
            println!("{}", address);
        }
        Ok(())
    }

    async fn start_node(&self, miner: Option<Address>) -> Result<()> {
        println!("Starting node {}", self.config.node_id);

        let config = match miner {
            Some(address) => self.config.clone().with_miner(address),
            None => self.config.clone(),
        };

        let storage = self.open_storage()?;
        let ledger = storage.ledger()?;
        Node::new(config, storage, ledger).start().await
    }

    fn reindex_utxo(&self) -> Result<()> {
        let storage = self.open_storage()?;
        let ledger = storage.ledger()?;
        let count = storage.utxo_set.reindex(&ledger)?;

        println!("Done! There are {} transactions in the UTXO set.", count);
        Ok(())
    }
}

fn print_transaction(tx: &Transaction) {
    println!("--- Transaction {}:", tx.id);
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.is_coinbase() {
            println!("     Input {}: coinbase \"{}\"", i, String::from_utf8_lossy(&input.signature));
        } else {
            println!("     Input {}:", i);
            println!("       TXID:      {}", input.prev_tx_id);
            println!("       Out:       {}", input.prev_index);
            println!("       Signature: {}", hex::encode(&input.signature));
            println!("       PubKey:    {}", hex::encode(&input.pub_key));
        }
    }
    for (i, output) in tx.outputs.iter().enumerate() {
        println!("     Output {}:", i);
        println!("       Value:  {}", output.value);
        println!("       Script: {}", Address::from_pub_key_hash(&output.pub_key_hash));
    }
}
