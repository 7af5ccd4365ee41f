use std::{future::Future, sync::Arc, time::Duration};

use companion_protocol::{DialogContext, DialogResponse};
use tokio::sync::mpsc;

use crate::{
    backend::NetworkDialogBackend,
    cache::PersonalityCache,
    collaborators::{CharacterStore, ResponseGenerator, TelemetrySink},
    config::NodeSettings,
    error::NodeError,
    identity::CompanionIdentity,
    protocol::ProtocolManager,
    time::now_micros,
    transport::{Inbound, Transport},
};

/// Default spacing between cache purges.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// CompanionNode
// ============================================================================

/// One companion on the mesh: protocol handling plus dialog selection.
///
/// Shared behind `Arc`: `run` drives inbound traffic while callers use
/// `select_best_response` / `respond` concurrently.
pub struct CompanionNode {
    protocol: Arc<ProtocolManager>,
    backend: NetworkDialogBackend,
    generator: Arc<dyn ResponseGenerator>,
    purge_interval: Duration,
}

impl CompanionNode {
    pub fn new(
        identity: &CompanionIdentity,
        transport: Arc<dyn Transport>,
        character: Arc<dyn CharacterStore>,
        generator: Arc<dyn ResponseGenerator>,
        telemetry: Arc<dyn TelemetrySink>,
        settings: NodeSettings,
    ) -> Result<Self, NodeError> {
        settings.validate()?;
        let cache = Arc::new(PersonalityCache::new(settings.cache_ttl, settings.initial_trust));
        let protocol = Arc::new(
            ProtocolManager::new(identity, transport, Arc::clone(&character), cache, settings)
                .with_generator(Arc::clone(&generator)),
        );
        let backend = NetworkDialogBackend::new(Arc::clone(&protocol), character, telemetry);

        tracing::info!(peer = %identity.peer_id, "Companion node ready");
        Ok(Self { protocol, backend, generator, purge_interval: DEFAULT_PURGE_INTERVAL })
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    pub fn protocol(&self) -> &Arc<ProtocolManager> {
        &self.protocol
    }

    pub fn peer_id(&self) -> &str {
        self.protocol.local_peer_id()
    }

    pub async fn select_best_response(
        &self,
        context: &DialogContext,
        local: DialogResponse,
        peer_ids: &[String],
    ) -> Result<DialogResponse, NodeError> {
        self.backend.select_best_response(context, local, peer_ids).await
    }

    /// Generate our own candidate for `context`, then select among it and
    /// the peers' candidates.
    pub async fn respond(&self, context: &DialogContext, peer_ids: &[String]) -> Result<DialogResponse, NodeError> {
        let local = self.generator.generate(context).await?;
        self.select_best_response(context, local, peer_ids).await
    }

    // ========================================================================
    // Main event loop
    // ========================================================================

    /// Handle inbound frames and purge the cache until `shutdown` resolves
    /// or the inbound channel closes.
    pub async fn run<F>(&self, mut inbound: mpsc::Receiver<Inbound>, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let start = tokio::time::Instant::now() + self.purge_interval;
        let mut purge_timer = tokio::time::interval_at(start, self.purge_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        tracing::info!("Inbound channel closed, stopping");
                        break;
                    };
                    // Handlers may await replies; keep the loop free.
                    let protocol = Arc::clone(&self.protocol);
                    tokio::spawn(async move {
                        protocol.on_bytes(&msg.peer_id, &msg.bytes).await;
                    });
                }
                _ = purge_timer.tick() => {
                    let purged = self.protocol.purge_at(now_micros());
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired personalities");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        let stats = self.protocol.stats().snapshot();
        tracing::info!(
            received = stats.received,
            verified = stats.verified,
            sent = stats.sent,
            "Companion node stopped",
        );
        Ok(())
    }
}
