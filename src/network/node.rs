// Network node - message handling, block sync and mining

use crate::config::NodeConfig;
use crate::consensus::BlockValidator;
use crate::core::{Block, Hash256, PubKeyHash, Transaction};
use crate::error::{ChainError, Result};
use crate::network::peer::{receive_message, send_message};
use crate::network::{InvType, Mempool, Message, PROTOCOL_VERSION, PeerSet};
use crate::storage::{Ledger, Storage};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};

/// Network node
///
/// Cheap to clone; every clone shares the same peers, mempool and blocks in transit.
#[derive(Clone)]
pub struct Node {
    config: Arc<NodeConfig>,
    storage: Storage,
    ledger: Ledger,
    validator: BlockValidator,
    /// Known peers, bootstrap first
    peers: Arc<RwLock<PeerSet>>,
    /// Announced blocks not fetched yet
    blocks_in_transit: Arc<Mutex<Vec<Hash256>>>,
    mempool: Arc<Mutex<Mempool>>,
    /// Held across every ledger append and the UTXO update that follows it
    chain_update: Arc<Mutex<()>>,
}

/// How the mining loop treats a pending transaction
#[derive(Debug, PartialEq, Eq)]
enum Candidate {
    Minable,
    /// Spends an output of another pending transaction; retried next round
    Waiting,
    Invalid,
}

impl Node {
    /// Create a node over an opened chain
    pub fn new(config: NodeConfig, storage: Storage, ledger: Ledger) -> Self {
        let peers = PeerSet::new(config.bootstrap.clone());
        Self {
            validator: BlockValidator::with_pow(ledger.pow()),
            config: Arc::new(config),
            storage,
            ledger,
            peers: Arc::new(RwLock::new(peers)),
            blocks_in_transit: Arc::new(Mutex::new(Vec::new())),
            mempool: Arc::new(Mutex::new(Mempool::new())),
            chain_update: Arc::new(Mutex::new(())),
        }
    }

    pub fn address(&self) -> &str {
        &self.config.listen_addr
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub async fn peers(&self) -> Vec<String> {
        self.peers.read().await.all()
    }

    pub async fn mempool_len(&self) -> usize {
        self.mempool.lock().await.len()
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Announce ourselves to the bootstrap node, then accept connections on `listener`
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        log::info!("Node listening on {}", self.config.listen_addr);
        if let Some(miner) = &self.config.mining_address {
            log::info!("Mining is on. Address to receive rewards: {}", miner);
        }

        if !self.config.is_bootstrap() {
            self.send_version(&self.config.bootstrap).await?;
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New connection from {}", addr);

            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = node.handle_connection(stream).await {
                    log::error!("Connection from {} failed: {}", addr, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let message = receive_message(&mut stream, self.config.io_timeout).await?;
        drop(stream);
        self.handle_message(message).await
    }

    /// Process one decoded message
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        log::debug!("Received {} from {}", message.message_type().as_str(), message.addr_from());

        match message {
            Message::Version {
                best_height,
                addr_from,
                ..
            } => self.handle_version(best_height, &addr_from).await,
            Message::GetBlocks { addr_from } => self.handle_get_blocks(&addr_from).await,
            Message::Inventory {
                addr_from,
                kind,
                items,
            } => self.handle_inventory(&addr_from, kind, items).await,
            Message::GetData { addr_from, kind, id } => self.handle_get_data(&addr_from, kind, id).await,
            Message::BlockData { addr_from, block } => self.handle_block_data(&addr_from, block).await,
            Message::TxData {
                addr_from,
                transaction,
            } => self.handle_tx_data(&addr_from, transaction).await,
        }
    }

    /// Send to a peer, forgetting it if it cannot be reached
    async fn send(&self, addr: &str, message: &Message) -> bool {
        match send_message(addr, message, self.config.io_timeout).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{} is not available, removing it: {}", addr, e);
                self.peers.write().await.remove(addr);
                false
            }
        }
    }

    async fn send_version(&self, addr: &str) -> Result<()> {
        let message = Message::Version {
            version: PROTOCOL_VERSION,
            best_height: self.ledger.best_height()?,
            addr_from: self.config.listen_addr.clone(),
        };
        self.send(addr, &message).await;
        Ok(())
    }

    async fn handle_version(&self, remote_height: u64, addr_from: &str) -> Result<()> {
        let local_height = self.ledger.best_height()?;

        if local_height < remote_height {
            let request = Message::GetBlocks {
                addr_from: self.config.listen_addr.clone(),
            };
            self.send(addr_from, &request).await;
        } else if local_height > remote_height {
            self.send_version(addr_from).await?;
        }

        if self.peers.write().await.add(addr_from) {
            log::info!("Learned peer {}", addr_from);
        }
        Ok(())
    }

    async fn handle_get_blocks(&self, addr_from: &str) -> Result<()> {
        let inventory = Message::Inventory {
            addr_from: self.config.listen_addr.clone(),
            kind: InvType::Block,
            items: self.ledger.block_hashes()?,
        };
        self.send(addr_from, &inventory).await;
        Ok(())
    }

    async fn handle_inventory(&self, addr_from: &str, kind: InvType, items: Vec<Hash256>) -> Result<()> {
        log::info!("Received inventory with {} {}", items.len(), kind.as_str());

        match kind {
            InvType::Block => {
                let mut wanted = Vec::with_capacity(items.len());
                for hash in items {
                    if !self.ledger.has_block(&hash)? {
                        wanted.push(hash);
                    }
                }
                if wanted.is_empty() {
                    return Ok(());
                }

                let first = wanted.remove(0);
                *self.blocks_in_transit.lock().await = wanted;
                self.request(addr_from, InvType::Block, first).await;
            }
            InvType::Tx => {
                for id in items {
                    let known = self.mempool.lock().await.contains(&id);
                    if !known {
                        self.request(addr_from, InvType::Tx, id).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn request(&self, addr: &str, kind: InvType, id: Hash256) {
        let message = Message::GetData {
            addr_from: self.config.listen_addr.clone(),
            kind,
            id,
        };
        self.send(addr, &message).await;
    }

    async fn handle_get_data(&self, addr_from: &str, kind: InvType, id: Hash256) -> Result<()> {
        let reply = match kind {
            InvType::Block => match self.ledger.get_block(&id) {
                Ok(block) => Message::BlockData {
                    addr_from: self.config.listen_addr.clone(),
                    block,
                },
                Err(ChainError::BlockNotFound(_)) => {
                    log::warn!("{} asked for unknown block {}", addr_from, id);
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
            InvType::Tx => {
                let Some(transaction) = self.mempool.lock().await.get(&id).cloned() else {
                    log::warn!("{} asked for unknown transaction {}", addr_from, id);
                    return Ok(());
                };
                Message::TxData {
                    addr_from: self.config.listen_addr.clone(),
                    transaction,
                }
            }
        };

        self.send(addr_from, &reply).await;
        Ok(())
    }

    async fn handle_block_data(&self, addr_from: &str, block: Block) -> Result<()> {
        let parent = if block.is_genesis() {
            None
        } else {
            match self.ledger.get_block(&block.prev_hash) {
                Ok(parent) => Some(parent),
                Err(ChainError::BlockNotFound(_)) => None,
                Err(e) => return Err(e),
            }
        };

        match self.validator.validate_block(&block, parent.as_ref()) {
            Ok(()) => {
                let outcome = {
                    let _chain = self.chain_update.lock().await;
                    self.ledger.append(&block)?
                };
                log::info!("Added block {} at height {} ({:?})", block.hash, block.height, outcome);

                let mut mempool = self.mempool.lock().await;
                for tx in &block.transactions {
                    mempool.remove(&tx.id);
                }
            }
            Err(e) => log::warn!("Rejected block {} from {}: {}", block.hash, addr_from, e),
        }

        let next = {
            let mut transit = self.blocks_in_transit.lock().await;
            if transit.is_empty() { None } else { Some(transit.remove(0)) }
        };

        match next {
            Some(hash) => self.request(addr_from, InvType::Block, hash).await,
            None => {
                let chain = self.chain_update.clone().lock_owned().await;
                let ledger = self.ledger.clone();
                let utxo_set = self.storage.utxo_set.clone();
                tokio::task::spawn_blocking(move || {
                    let _chain = chain;
                    utxo_set.reindex(&ledger)
                })
                .await??;
            }
        }
        Ok(())
    }

    async fn handle_tx_data(&self, addr_from: &str, transaction: Transaction) -> Result<()> {
        let id = transaction.id;
        let pending = {
            let mut mempool = self.mempool.lock().await;
            mempool.insert(transaction);
            mempool.len()
        };
        log::debug!("Transaction {} pooled, {} pending", id, pending);

        if self.config.is_bootstrap() {
            let others = self
                .peers
                .read()
                .await
                .others(&[self.config.listen_addr.as_str(), addr_from]);
            let announcement = Message::Inventory {
                addr_from: self.config.listen_addr.clone(),
                kind: InvType::Tx,
                items: vec![id],
            };
            for peer in others {
                self.send(&peer, &announcement).await;
            }
        }

        if let Some(miner) = &self.config.mining_address {
            let miner = miner.to_pub_key_hash()?;
            self.mine_pending(&miner).await?;
        }
        Ok(())
    }

    /// Mine blocks while the mempool holds more than the threshold and rounds keep producing
    pub async fn mine_pending(&self, miner: &PubKeyHash) -> Result<()> {
        loop {
            let mut mempool = self.mempool.clone().lock_owned().await;
            if mempool.len() <= self.config.mining_threshold {
                return Ok(());
            }

            let chain = self.chain_update.clone().lock_owned().await;
            let node = self.clone();
            let miner = *miner;
            let mined = tokio::task::spawn_blocking(move || {
                let _chain = chain;
                node.mine_round(&mut mempool, &miner)
            })
            .await??;

            let Some(block) = mined else {
                return Ok(());
            };

            let others = self.peers.read().await.others(&[self.config.listen_addr.as_str()]);
            let announcement = Message::Inventory {
                addr_from: self.config.listen_addr.clone(),
                kind: InvType::Block,
                items: vec![block.hash],
            };
            for peer in others {
                self.send(&peer, &announcement).await;
            }
        }
    }

    /// Verify, mine, append, update the UTXO set and drain, all under the mempool and chain locks
    fn mine_round(&self, mempool: &mut Mempool, miner: &PubKeyHash) -> Result<Option<Block>> {
        let mut selected = Vec::new();
        let mut claimed: HashSet<(Hash256, i32)> = HashSet::new();

        for tx in mempool.transactions() {
            match self.classify(&tx, &claimed, mempool)? {
                Candidate::Minable => {
                    claimed.extend(tx.inputs.iter().map(|input| (input.prev_tx_id, input.prev_index)));
                    selected.push(tx);
                }
                Candidate::Waiting => log::debug!("Transaction {} waits for its parent", tx.id),
                Candidate::Invalid => {
                    log::warn!("Dropping invalid transaction {}", tx.id);
                    mempool.remove(&tx.id);
                }
            }
        }

        if selected.is_empty() {
            log::info!("No pending transaction can be mined yet");
            return Ok(None);
        }

        selected.push(Transaction::coinbase(miner, ""));
        let block = self.ledger.mine_block(selected)?;

        if self.ledger.tip_hash()? == block.hash {
            self.storage.utxo_set.apply(&block)?;
        } else {
            self.storage.utxo_set.reindex(&self.ledger)?;
        }

        for tx in &block.transactions {
            mempool.remove(&tx.id);
        }

        log::info!("New block {} is mined with {} transactions", block.hash, block.transactions.len());
        Ok(Some(block))
    }

    fn classify(
        &self,
        tx: &Transaction,
        claimed: &HashSet<(Hash256, i32)>,
        mempool: &Mempool,
    ) -> Result<Candidate> {
        if tx.is_coinbase() || tx.id != tx.hash() {
            return Ok(Candidate::Invalid);
        }

        let mut waiting = false;
        for input in &tx.inputs {
            if claimed.contains(&(input.prev_tx_id, input.prev_index)) {
                return Ok(Candidate::Invalid);
            }
            if !self.storage.utxo_set.is_unspent(&input.prev_tx_id, input.prev_index)? {
                if mempool.contains(&input.prev_tx_id) {
                    waiting = true;
                } else {
                    return Ok(Candidate::Invalid);
                }
            }
        }
        if waiting {
            return Ok(Candidate::Waiting);
        }

        if self.ledger.verify_transaction(tx)? {
            Ok(Candidate::Minable)
        } else {
            Ok(Candidate::Invalid)
        }
    }
}

/// Hand a signed transaction to the bootstrap node
pub async fn submit_transaction(config: &NodeConfig, transaction: Transaction) -> Result<()> {
    let message = Message::TxData {
        addr_from: config.listen_addr.clone(),
        transaction,
    };
    send_message(&config.bootstrap, &message, config.io_timeout).await
}
