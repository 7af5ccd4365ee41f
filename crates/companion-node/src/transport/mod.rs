//! Byte transports the protocol manager sends through.
//!
//! Session establishment and peer discovery live below this seam; the
//! protocol layer only sees `send(peer, bytes)` and inbound `(peer, bytes)`.

mod memory;
mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

use async_trait::async_trait;

use crate::error::NodeError;

/// One frame received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub peer_id: String,
    pub bytes: Vec<u8>,
}

/// Capacity of inbound channels created by the transports.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), NodeError>;
}
