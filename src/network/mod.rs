// P2P gossip protocol

pub mod message;
pub mod server;

pub use message::{InvKind, Message, COMMAND_LENGTH, PROTOCOL_VERSION};
pub use server::{
    send_transaction, start_server, NodeRuntime, BOOTSTRAP_NODE, MEMPOOL_MINE_THRESHOLD,
};
