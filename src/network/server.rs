// Peer server: accepts one-message connections, routes them to handlers,
// and drives chain sync, transaction propagation, and mining.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::core::{Block, Serializable, Transaction};
use crate::error::{Error, Result};
use crate::network::message::{InvKind, Message, PROTOCOL_VERSION};
use crate::storage::{Blockchain, UtxoSet};

/// First entry of every node's peer list
pub const BOOTSTRAP_NODE: &str = "localhost:3000";
/// Mempool size at which a miner node starts mining
pub const MEMPOOL_MINE_THRESHOLD: usize = 2;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-wide node state threaded through every handler.
pub struct NodeRuntime {
    node_address: String,
    miner_address: String,
    chain: Blockchain,
    known_nodes: Mutex<Vec<String>>,
    blocks_in_transit: Mutex<Vec<Vec<u8>>>,
    mempool: Mutex<HashMap<String, Transaction>>,
}

impl NodeRuntime {
    pub fn new(node_address: String, miner_address: String, chain: Blockchain) -> Self {
        Self {
            node_address,
            miner_address,
            chain,
            known_nodes: Mutex::new(vec![BOOTSTRAP_NODE.to_string()]),
            blocks_in_transit: Mutex::new(Vec::new()),
            mempool: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    // ------------------------------------------------------------------
    // Message handlers
    // ------------------------------------------------------------------

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let mut request = Vec::new();
        timeout(READ_TIMEOUT, stream.read_to_end(&mut request))
            .await
            .map_err(|_| Error::Io("read timed out".to_string()))??;
        drop(stream);

        let message = match Message::from_bytes(&request) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("discarding unreadable message: {}", e);
                return Ok(());
            }
        };
        log::info!("received {} command", message.command());

        match message {
            Message::Version {
                version,
                best_height,
                addr_from,
            } => self.handle_version(version, best_height, addr_from).await,
            Message::Addr { addr_list } => self.handle_addr(addr_list).await,
            Message::Inv {
                addr_from,
                kind,
                items,
            } => self.handle_inv(addr_from, kind, items).await,
            Message::GetBlocks { addr_from } => self.handle_get_blocks(addr_from).await,
            Message::GetData {
                addr_from,
                kind,
                id,
            } => self.handle_get_data(addr_from, kind, id).await,
            Message::Block { addr_from, block } => self.handle_block(addr_from, block).await,
            Message::Tx {
                addr_from,
                transaction,
            } => self.handle_tx(addr_from, transaction).await,
        }
    }

    async fn handle_version(
        &self,
        version: u32,
        best_height: u32,
        addr_from: String,
    ) -> Result<()> {
        log::debug!("version {} from {} at height {}", version, addr_from, best_height);

        let my_height = self.chain.best_height()?;
        if my_height < best_height {
            self.send_get_blocks(&addr_from).await;
        } else if my_height > best_height {
            self.send_version(&addr_from).await;
        }

        let mut known = self.known_nodes.lock().await;
        if !known.contains(&addr_from) {
            known.push(addr_from);
        }
        Ok(())
    }

    async fn handle_addr(&self, addr_list: Vec<String>) -> Result<()> {
        {
            let mut known = self.known_nodes.lock().await;
            for addr in addr_list {
                if !known.contains(&addr) {
                    known.push(addr);
                }
            }
            log::info!("there are {} known nodes", known.len());
        }

        // Ask every peer (including the new ones) for their inventories
        for node in self.peers_snapshot().await {
            self.send_get_blocks(&node).await;
        }
        Ok(())
    }

    async fn handle_get_blocks(&self, addr_from: String) -> Result<()> {
        let hashes = self.chain.block_hashes()?;
        self.send_inv(&addr_from, InvKind::Block, hashes).await;
        Ok(())
    }

    async fn handle_inv(
        &self,
        addr_from: String,
        kind: InvKind,
        items: Vec<Vec<u8>>,
    ) -> Result<()> {
        log::info!("received inventory with {} items", items.len());

        match kind {
            InvKind::Block => {
                let first = match items.first() {
                    Some(first) => first.clone(),
                    None => return Ok(()),
                };
                {
                    let mut transit = self.blocks_in_transit.lock().await;
                    *transit = items;
                    transit.retain(|hash| *hash != first);
                }
                self.send_get_data(&addr_from, InvKind::Block, &first).await;
            }
            InvKind::Tx => {
                let id = match items.first() {
                    Some(id) => id.clone(),
                    None => return Ok(()),
                };
                let already_known = self.mempool.lock().await.contains_key(&hex::encode(&id));
                if !already_known {
                    self.send_get_data(&addr_from, InvKind::Tx, &id).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_get_data(&self, addr_from: String, kind: InvKind, id: Vec<u8>) -> Result<()> {
        match kind {
            InvKind::Block => {
                // A request for an unknown block is the requester's problem
                if let Ok(block) = self.chain.get_block(&id) {
                    self.send_block(&addr_from, &block).await;
                }
            }
            InvKind::Tx => {
                let tx = self.mempool.lock().await.get(&hex::encode(&id)).cloned();
                if let Some(tx) = tx {
                    self.send_tx(&addr_from, &tx).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_block(&self, addr_from: String, block_bytes: Vec<u8>) -> Result<()> {
        let block = Block::deserialize(&block_bytes)?;
        log::info!("received block {}", hex::encode(&block.hash));
        self.chain.add_block(&block)?;

        let next = {
            let mut transit = self.blocks_in_transit.lock().await;
            if transit.is_empty() {
                None
            } else {
                Some(transit.remove(0))
            }
        };

        match next {
            Some(hash) => self.send_get_data(&addr_from, InvKind::Block, &hash).await,
            None => {
                // Download finished, bring the UTXO index up to the chain
                tokio::task::block_in_place(|| UtxoSet::new(&self.chain).reindex())?;
            }
        }
        Ok(())
    }

    async fn handle_tx(&self, addr_from: String, tx_bytes: Vec<u8>) -> Result<()> {
        let tx = Transaction::deserialize(&tx_bytes)?;
        let txid = hex::encode(&tx.id);

        let mempool_size = {
            let mut mempool = self.mempool.lock().await;
            mempool.insert(txid.clone(), tx.clone());
            mempool.len()
        };
        log::info!("mempool holds {} transactions", mempool_size);

        if self.node_address == BOOTSTRAP_NODE {
            // The bootstrap node relays the announcement to everyone else
            for node in self.peers_snapshot().await {
                if node != self.node_address && node != addr_from {
                    self.send_inv(&node, InvKind::Tx, vec![tx.id.clone()]).await;
                }
            }
        } else if !self.miner_address.is_empty() && mempool_size >= MEMPOOL_MINE_THRESHOLD {
            self.mine_transactions().await?;
        }
        Ok(())
    }

    /// Drain the mempool into mined blocks: verify candidates, prepend a
    /// coinbase, mine, reindex, evict mined transactions, announce the new
    /// block. Repeats while verifiable transactions remain.
    async fn mine_transactions(&self) -> Result<()> {
        loop {
            let candidates: Vec<Transaction> =
                self.mempool.lock().await.values().cloned().collect();

            let mut txs = Vec::new();
            for tx in candidates {
                match self.chain.verify_transaction(&tx) {
                    Ok(true) => txs.push(tx),
                    Ok(false) => log::warn!("dropping invalid tx {}", hex::encode(&tx.id)),
                    Err(e) => log::warn!("cannot verify tx {}: {}", hex::encode(&tx.id), e),
                }
            }
            if txs.is_empty() {
                log::warn!("no verifiable transactions to mine");
                return Ok(());
            }

            let coinbase = Transaction::coinbase(&self.miner_address, Vec::new())?;
            let mut block_txs = vec![coinbase];
            block_txs.extend(txs.iter().cloned());

            // PoW is CPU-bound; keep it off the async worker threads
            let new_block =
                tokio::task::block_in_place(|| self.chain.mine_block(block_txs))?;
            tokio::task::block_in_place(|| UtxoSet::new(&self.chain).reindex())?;
            log::info!("new block mined: {}", hex::encode(&new_block.hash));

            let remaining = {
                let mut mempool = self.mempool.lock().await;
                for tx in &txs {
                    mempool.remove(&hex::encode(&tx.id));
                }
                mempool.len()
            };

            for node in self.peers_snapshot().await {
                if node != self.node_address {
                    self.send_inv(&node, InvKind::Block, vec![new_block.hash.clone()])
                        .await;
                }
            }

            if remaining == 0 {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Senders
    // ------------------------------------------------------------------

    pub async fn send_version(&self, addr: &str) {
        let best_height = match self.chain.best_height() {
            Ok(height) => height,
            Err(e) => {
                log::error!("cannot read best height: {}", e);
                return;
            }
        };
        let message = Message::Version {
            version: PROTOCOL_VERSION,
            best_height,
            addr_from: self.node_address.clone(),
        };
        self.send_data(addr, message.to_bytes()).await;
    }

    async fn send_get_blocks(&self, addr: &str) {
        let message = Message::GetBlocks {
            addr_from: self.node_address.clone(),
        };
        self.send_data(addr, message.to_bytes()).await;
    }

    async fn send_get_data(&self, addr: &str, kind: InvKind, id: &[u8]) {
        let message = Message::GetData {
            addr_from: self.node_address.clone(),
            kind,
            id: id.to_vec(),
        };
        self.send_data(addr, message.to_bytes()).await;
    }

    async fn send_inv(&self, addr: &str, kind: InvKind, items: Vec<Vec<u8>>) {
        let message = Message::Inv {
            addr_from: self.node_address.clone(),
            kind,
            items,
        };
        self.send_data(addr, message.to_bytes()).await;
    }

    async fn send_block(&self, addr: &str, block: &Block) {
        let message = Message::Block {
            addr_from: self.node_address.clone(),
            block: block.serialize(),
        };
        self.send_data(addr, message.to_bytes()).await;
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) {
        let message = Message::Tx {
            addr_from: self.node_address.clone(),
            transaction: tx.serialize(),
        };
        self.send_data(addr, message.to_bytes()).await;
    }

    /// One message, one connection. A peer that cannot be reached is
    /// dropped from the known-nodes list.
    async fn send_data(&self, addr: &str, data: Vec<u8>) {
        if let Err(e) = send_raw(addr, &data).await {
            log::warn!("{} is not available ({}), dropping peer", addr, e);
            let mut known = self.known_nodes.lock().await;
            known.retain(|node| node != addr);
        }
    }

    async fn peers_snapshot(&self) -> Vec<String> {
        self.known_nodes.lock().await.clone()
    }
}

/// Dial, write the whole message, close.
pub async fn send_raw(addr: &str, data: &[u8]) -> Result<()> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Io(format!("connect to {} timed out", addr)))??;
    timeout(WRITE_TIMEOUT, stream.write_all(data))
        .await
        .map_err(|_| Error::Io(format!("write to {} timed out", addr)))??;
    stream.shutdown().await?;
    Ok(())
}

/// Fire a transaction at a node (used by the CLI `send` path, which has no
/// running server of its own).
pub async fn send_transaction(addr: &str, tx: &Transaction) -> Result<()> {
    let message = Message::Tx {
        addr_from: String::new(),
        transaction: tx.serialize(),
    };
    send_raw(addr, &message.to_bytes()).await
}

/// Open this node's chain and serve the peer protocol on
/// `localhost:<node_id>` until a shutdown signal arrives.
pub async fn start_server(node_id: &str, miner_address: &str) -> Result<()> {
    let node_address = format!("localhost:{}", node_id);
    let chain = Blockchain::open(node_id)?;
    let runtime = Arc::new(NodeRuntime::new(
        node_address,
        miner_address.to_string(),
        chain,
    ));

    // Shutdown supervisor: close the chain store on SIGINT/SIGTERM
    let supervisor = runtime.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown signal received, closing chain store");
            if let Err(e) = supervisor.chain.flush() {
                log::error!("chain store flush failed: {}", e);
                std::process::exit(1);
            }
            std::process::exit(0);
        }
    });

    serve(runtime).await
}

/// Bind the runtime's address and dispatch each incoming connection to its
/// own task.
pub async fn serve(runtime: Arc<NodeRuntime>) -> Result<()> {
    let listener = TcpListener::bind(&runtime.node_address).await?;
    log::info!("node listening on {}", runtime.node_address);

    if runtime.node_address == BOOTSTRAP_NODE {
        // The bootstrap node's self-handshake primes the tip exchange
        runtime.send_version(BOOTSTRAP_NODE).await;
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        let runtime = runtime.clone();
        tokio::spawn(async move {
            if let Err(e) = runtime.handle_connection(stream).await {
                log::error!("connection from {} failed: {}", peer, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use tokio::time::sleep;

    fn runtime_on(port: u16, chain: Blockchain) -> Arc<NodeRuntime> {
        Arc::new(NodeRuntime::new(
            format!("localhost:{}", port),
            String::new(),
            chain,
        ))
    }

    #[tokio::test]
    async fn version_handshake_registers_peer() {
        let miner = Wallet::generate();
        let runtime = runtime_on(3999, Blockchain::open_temporary(&miner.address()));

        // Same height on both sides: no sync traffic, peer just gets added
        runtime
            .handle_version(PROTOCOL_VERSION, 0, "localhost:3998".to_string())
            .await
            .unwrap();

        let known = runtime.known_nodes.lock().await;
        assert!(known.contains(&"localhost:3998".to_string()));
    }

    #[tokio::test]
    async fn tx_message_lands_in_mempool() {
        let miner = Wallet::generate();
        let runtime = runtime_on(3997, Blockchain::open_temporary(&miner.address()));

        let tx = Transaction::coinbase(&miner.address(), b"mempool test".to_vec()).unwrap();
        runtime
            .handle_tx("localhost:3996".to_string(), tx.serialize())
            .await
            .unwrap();

        let mempool = runtime.mempool.lock().await;
        assert!(mempool.contains_key(&hex::encode(&tx.id)));
    }

    #[tokio::test]
    async fn block_inventory_tracks_transit() {
        let miner = Wallet::generate();
        let runtime = runtime_on(3995, Blockchain::open_temporary(&miner.address()));

        let items = vec![vec![1u8; 32], vec![2u8; 32], vec![3u8; 32]];
        runtime
            .handle_inv("localhost:3994".to_string(), InvKind::Block, items.clone())
            .await
            .unwrap();

        // First item was requested immediately, the rest stay in transit
        let transit = runtime.blocks_in_transit.lock().await;
        assert_eq!(*transit, items[1..].to_vec());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn received_block_advances_chain_and_reindexes() {
        let miner = Wallet::generate();
        let chain = Blockchain::open_temporary(&miner.address());
        let tip = chain.block_hashes().unwrap()[0].clone();
        let coinbase = Transaction::coinbase(&miner.address(), Vec::new()).unwrap();
        let block = Block::new(vec![coinbase], tip, 1).unwrap();

        let runtime = runtime_on(3993, chain);
        runtime
            .handle_block("localhost:3992".to_string(), block.serialize())
            .await
            .unwrap();

        assert_eq!(runtime.chain.best_height().unwrap(), 1);
        // Transit was empty, so the handler reindexed: genesis + new coinbase
        let utxo = UtxoSet::new(&runtime.chain);
        assert_eq!(utxo.count_transactions().unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nodes_synchronize_chains() {
        let miner = Wallet::generate();
        let chain1 = Blockchain::open_temporary(&miner.address());
        for _ in 0..2 {
            let cb = Transaction::coinbase(&miner.address(), Vec::new()).unwrap();
            chain1.mine_block(vec![cb]).unwrap();
        }
        let chain2 = Blockchain::open_temporary(&Wallet::generate().address());

        let n1 = runtime_on(3900, chain1);
        let n2 = runtime_on(3901, chain2);
        {
            let mut known = n1.known_nodes.lock().await;
            *known = vec!["localhost:3901".to_string()];
        }
        {
            let mut known = n2.known_nodes.lock().await;
            *known = vec!["localhost:3900".to_string()];
        }

        tokio::spawn(serve(n1.clone()));
        tokio::spawn(serve(n2.clone()));
        sleep(Duration::from_millis(200)).await;

        // The fresh node announces itself; inventory-driven sync follows
        n2.send_version("localhost:3900").await;

        for _ in 0..50 {
            if n2.chain.best_height().unwrap() == 2 {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(n2.chain.best_height().unwrap(), 2);
        assert_eq!(n1.chain.best_height().unwrap(), 2);
    }
}
