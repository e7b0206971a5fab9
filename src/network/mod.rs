// P2P networking

mod mempool;
mod message;
mod node;
mod peer;

pub use mempool::Mempool;
pub use message::{COMMAND_LEN, InvType, Message, MessageType, PROTOCOL_VERSION};
pub use node::{Node, submit_transaction};
pub use peer::{PeerSet, receive_message, send_message};
