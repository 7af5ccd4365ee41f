//! Companion node runtime: personality exchange, peer dialog queries and
//! multi-factor response selection over a signed envelope protocol.

pub mod backend;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod node;
pub mod peer_state;
pub mod protocol;
pub mod rate_limit;
pub mod scorer;
pub mod stats;
pub mod time;
pub mod transport;

pub use backend::NetworkDialogBackend;
pub use error::NodeError;
pub use node::CompanionNode;
