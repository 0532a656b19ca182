// Command-line surface. Every command reads NODE_ID from the environment
// (resolved in main) to pick the node's data directory and wallet file.

use clap::{Parser, Subcommand};

use crate::consensus::ProofOfWork;
use crate::error::{Error, Result};
use crate::network;
use crate::network::BOOTSTRAP_NODE;
use crate::storage::{Blockchain, UtxoSet};
use crate::wallet::{new_utxo_transaction, pub_key_hash_from_address, validate_address, Wallets};

#[derive(Parser)]
#[command(name = "tinycoin")]
#[command(about = "Educational UTXO blockchain node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a new keypair and print its address
    Createwallet,

    /// Print one wallet address per line
    Listaddresses,

    /// Create the chain; the genesis coinbase pays ADDRESS
    Createblockchain {
        #[arg(long)]
        address: String,
    },

    /// Print the balance of ADDRESS
    Getbalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT from an owned address to another address
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction immediately on this node
        #[arg(long)]
        mine: bool,
    },

    /// Print every block, tip to genesis
    Printchain,

    /// Rebuild the UTXO index from the chain
    Reindexutxo,

    /// Run the peer server on localhost:$NODE_ID
    Startnode {
        /// Enable mining and send rewards to this address
        #[arg(long)]
        miner: Option<String>,
    },
}

pub async fn run(cli: Cli, node_id: &str) -> Result<()> {
    match cli.command {
        Command::Createwallet => create_wallet(node_id),
        Command::Listaddresses => list_addresses(node_id),
        Command::Createblockchain { address } => create_blockchain(&address, node_id),
        Command::Getbalance { address } => get_balance(&address, node_id),
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => send(&from, &to, amount, node_id, mine).await,
        Command::Printchain => print_chain(node_id),
        Command::Reindexutxo => reindex_utxo(node_id),
        Command::Startnode { miner } => start_node(node_id, miner).await,
    }
}

fn create_wallet(node_id: &str) -> Result<()> {
    let mut wallets = Wallets::create(node_id)?;
    let address = wallets.add_wallet();
    wallets.save_file(node_id)?;
    println!("{}", address);
    Ok(())
}

fn list_addresses(node_id: &str) -> Result<()> {
    let wallets = Wallets::create(node_id)?;
    for address in wallets.addresses() {
        println!("{}", address);
    }
    Ok(())
}

fn create_blockchain(address: &str, node_id: &str) -> Result<()> {
    if !validate_address(address) {
        return Err(Error::InvalidAddress(address.to_string()));
    }

    let chain = Blockchain::init(address, node_id)?;
    UtxoSet::new(&chain).reindex()?;
    chain.flush()?;

    println!("blockchain created");
    Ok(())
}

fn get_balance(address: &str, node_id: &str) -> Result<()> {
    let pub_key_hash = pub_key_hash_from_address(address)?;
    let chain = Blockchain::open(node_id)?;
    let utxo = UtxoSet::new(&chain);

    let balance: u64 = utxo
        .find_unspent_outputs(&pub_key_hash)?
        .iter()
        .map(|output| output.value)
        .sum();

    println!("{}", balance);
    Ok(())
}

async fn send(from: &str, to: &str, amount: u64, node_id: &str, mine_now: bool) -> Result<()> {
    if !validate_address(from) {
        return Err(Error::InvalidAddress(from.to_string()));
    }
    if !validate_address(to) {
        return Err(Error::InvalidAddress(to.to_string()));
    }

    let chain = Blockchain::open(node_id)?;
    let utxo = UtxoSet::new(&chain);

    let wallets = Wallets::create(node_id)?;
    let wallet = wallets
        .get_wallet(from)
        .ok_or_else(|| Error::InvalidAddress(format!("{} is not in the wallet file", from)))?;

    let tx = new_utxo_transaction(wallet, to, amount, &utxo)?;

    if mine_now {
        let block = chain.mine_block(vec![tx])?;
        utxo.update(&block)?;
        chain.flush()?;
    } else {
        network::send_transaction(BOOTSTRAP_NODE, &tx).await?;
        log::info!("transaction sent to {}", BOOTSTRAP_NODE);
    }

    println!("success");
    Ok(())
}

fn print_chain(node_id: &str) -> Result<()> {
    let chain = Blockchain::open(node_id)?;

    for block in chain.iterator() {
        let block = block?;
        println!("prev. hash: {}", hex::encode(&block.prev_hash));
        println!("hash:       {}", hex::encode(&block.hash));
        println!("height:     {}", block.height);
        println!("pow:        {}", ProofOfWork::new(&block).validate());
        for tx in &block.transactions {
            println!("{}", tx);
        }
        println!();
    }
    Ok(())
}

fn reindex_utxo(node_id: &str) -> Result<()> {
    let chain = Blockchain::open(node_id)?;
    let utxo = UtxoSet::new(&chain);
    utxo.reindex()?;

    let count = utxo.count_transactions()?;
    println!("done, {} transactions in the UTXO set", count);
    Ok(())
}

async fn start_node(node_id: &str, miner: Option<String>) -> Result<()> {
    println!("starting node {}", node_id);

    let miner_address = miner.unwrap_or_default();
    if !miner_address.is_empty() {
        if !validate_address(&miner_address) {
            return Err(Error::InvalidAddress(miner_address));
        }
        println!("mining is on, rewards go to {}", miner_address);
    }

    network::start_server(node_id, &miner_address).await
}
