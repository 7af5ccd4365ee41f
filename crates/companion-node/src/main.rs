use std::sync::Arc;

use clap::Parser;
use companion_node::{
    collaborators::{CharacterStore, LogTelemetry, StaticCharacterStore, TemplateGenerator},
    config::Config,
    identity::CompanionIdentity,
    transport::{TcpTransport, INBOUND_CHANNEL_CAPACITY},
    CompanionNode,
};
use tokio::{net::TcpListener, sync::mpsc};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "companion_node=info".parse().unwrap()),
        )
        .init();

    let config = Config::parse();
    let settings = config.settings()?;
    let identity = CompanionIdentity::load_or_generate(&config.peer_id, &config.keypair_path)?;

    let character: Arc<dyn CharacterStore> = match &config.personality_path {
        Some(path) => Arc::new(StaticCharacterStore::from_json_file(path, config.privacy())?),
        None => {
            tracing::warn!("No --personality-path set, running with an empty personality");
            Arc::new(StaticCharacterStore::new(Default::default(), config.privacy()))
        }
    };

    let transport = Arc::new(TcpTransport::new(identity.peer_id.clone()));
    for peer in &config.peers {
        transport.add_peer(&peer.id, peer.addr);
    }

    let listener = TcpListener::bind(config.listen_addr).await?;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let listener_task = TcpTransport::spawn_listener(listener, inbound_tx);

    tracing::info!(
        peer = %identity.peer_id,
        listen = %config.listen_addr,
        peers = config.peers.len(),
        verifying_key = %hex::encode(identity.verifying_key.as_bytes()),
        "Companion node starting",
    );

    let node = CompanionNode::new(
        &identity,
        transport,
        character,
        Arc::new(TemplateGenerator::builtin()),
        Arc::new(LogTelemetry),
        settings,
    )?
    .with_purge_interval(config.purge_interval());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl-C handler failed: {e}");
        }
    };
    let result = node.run(inbound_rx, shutdown).await;
    listener_task.abort();
    result
}
