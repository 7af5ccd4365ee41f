use async_trait::async_trait;
use companion_protocol::{
    constants::{MAX_MESSAGE_SIZE, MAX_PEER_ID_LEN},
    validate_peer_id,
};
use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::RwLock,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};

use super::{Inbound, Transport};
use crate::error::NodeError;

/// Largest frame accepted: sender line + envelope.
const MAX_FRAME_SIZE: usize = MAX_MESSAGE_SIZE + MAX_PEER_ID_LEN + 1;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Framing: 4-byte LE length prefix
// ============================================================================

async fn read_framed<T: AsyncRead + Unpin>(io: &mut T, max: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame exceeds limit"));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_framed<T: AsyncWrite + Unpin>(io: &mut T, data: &[u8]) -> io::Result<()> {
    io.write_all(&(data.len() as u32).to_le_bytes()).await?;
    io.write_all(data).await?;
    io.flush().await
}

/// `<sender id>\n<envelope bytes>`
fn encode_frame(sender: &str, bytes: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(sender.len() + 1 + bytes.len());
    frame.extend_from_slice(sender.as_bytes());
    frame.push(b'\n');
    frame.extend_from_slice(bytes);
    frame
}

fn decode_frame(frame: Vec<u8>) -> Option<Inbound> {
    let split = frame.iter().position(|&b| b == b'\n')?;
    let peer_id = std::str::from_utf8(&frame[..split]).ok()?.to_string();
    validate_peer_id(&peer_id).ok()?;
    Some(Inbound { peer_id, bytes: frame[split + 1..].to_vec() })
}

// ============================================================================
// Transport
// ============================================================================

/// One TCP connection per send, addressed through a static peer table.
pub struct TcpTransport {
    local_id: String,
    addresses: RwLock<HashMap<String, SocketAddr>>,
}

impl TcpTransport {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self { local_id: local_id.into(), addresses: RwLock::new(HashMap::new()) }
    }

    pub fn add_peer(&self, peer_id: &str, addr: SocketAddr) {
        self.addresses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer_id.to_string(), addr);
    }

    fn address(&self, peer_id: &str) -> Option<SocketAddr> {
        self.addresses.read().unwrap_or_else(|e| e.into_inner()).get(peer_id).copied()
    }

    /// Accept connections on `listener`, forwarding frames to `inbound`.
    pub fn spawn_listener(listener: TcpListener, inbound: mpsc::Sender<Inbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let (stream, remote) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("TCP accept failed: {e}");
                        continue;
                    }
                };
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, inbound).await {
                        tracing::debug!(%remote, "Connection closed: {e}");
                    }
                });
            }
        })
    }
}

async fn serve_connection(mut stream: TcpStream, inbound: mpsc::Sender<Inbound>) -> io::Result<()> {
    loop {
        let frame = match read_framed(&mut stream, MAX_FRAME_SIZE).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        match decode_frame(frame) {
            Some(msg) => {
                if inbound.send(msg).await.is_err() {
                    return Ok(());
                }
            }
            None => tracing::debug!("Dropping frame without a valid sender line"),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), NodeError> {
        let addr = self
            .address(peer_id)
            .ok_or_else(|| NodeError::Transport(format!("no address for {peer_id}")))?;
        let frame = encode_frame(&self.local_id, &bytes);
        if frame.len() > MAX_FRAME_SIZE {
            return Err(NodeError::Transport(format!("frame of {} bytes exceeds limit", frame.len())));
        }
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| NodeError::Timeout(format!("connect to {peer_id}")))??;
        write_framed(&mut stream, &frame).await?;
        Ok(())
    }
}
