use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::mpsc;

use super::{Inbound, Transport, INBOUND_CHANNEL_CAPACITY};
use crate::error::NodeError;

#[derive(Default)]
struct Hub {
    mailboxes: HashMap<String, mpsc::Sender<Inbound>>,
    /// Sends fail immediately.
    unreachable: HashSet<String>,
    /// Sends succeed but nothing is delivered.
    silent: HashSet<String>,
}

/// In-process network connecting any number of `MemoryTransport`s.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach `peer_id`, returning its transport and inbound receiver.
    pub fn join(&self, peer_id: &str) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        self.hub().mailboxes.insert(peer_id.to_string(), tx);
        let transport = MemoryTransport { local_id: peer_id.to_string(), network: self.clone() };
        (transport, rx)
    }

    pub fn leave(&self, peer_id: &str) {
        self.hub().mailboxes.remove(peer_id);
    }

    pub fn set_unreachable(&self, peer_id: &str, unreachable: bool) {
        let mut hub = self.hub();
        if unreachable {
            hub.unreachable.insert(peer_id.to_string());
        } else {
            hub.unreachable.remove(peer_id);
        }
    }

    /// Swallow frames addressed to `peer_id` without reporting an error.
    pub fn set_silent(&self, peer_id: &str, silent: bool) {
        let mut hub = self.hub();
        if silent {
            hub.silent.insert(peer_id.to_string());
        } else {
            hub.silent.remove(peer_id);
        }
    }
}

pub struct MemoryTransport {
    local_id: String,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), NodeError> {
        let mailbox = {
            let hub = self.network.hub();
            if hub.unreachable.contains(peer_id) {
                return Err(NodeError::Transport(format!("{peer_id} unreachable")));
            }
            if hub.silent.contains(peer_id) {
                return Ok(());
            }
            hub.mailboxes
                .get(peer_id)
                .cloned()
                .ok_or_else(|| NodeError::Transport(format!("{peer_id} not connected")))?
        };
        mailbox
            .send(Inbound { peer_id: self.local_id.clone(), bytes })
            .await
            .map_err(|_| NodeError::Transport(format!("{peer_id} hung up")))
    }
}
