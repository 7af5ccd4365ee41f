use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::error::NodeError;

/// Companion identity: peer id + Ed25519 signing key.
pub struct CompanionIdentity {
    pub peer_id: String,
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl CompanionIdentity {
    pub fn generate(peer_id: impl Into<String>) -> Self {
        Self::from_signing_key(peer_id, SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(peer_id: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self { peer_id: peer_id.into(), signing_key, verifying_key }
    }

    pub fn save(&self, path: &Path) -> Result<(), NodeError> {
        use std::io::Write;
        // Owner read/write only.
        #[cfg(unix)]
        let file = std::fs::OpenOptions::new()
            .write(true).create(true).truncate(true).mode(0o600)
            .open(path);
        #[cfg(not(unix))]
        let file = std::fs::OpenOptions::new()
            .write(true).create(true).truncate(true)
            .open(path);
        let mut file = file.map_err(|e| NodeError::KeyFile(format!("{}: {e}", path.display())))?;
        file.write_all(&self.signing_key.to_bytes())
            .map_err(|e| NodeError::KeyFile(format!("{}: {e}", path.display())))
    }

    pub fn load(peer_id: impl Into<String>, path: &Path) -> Result<Self, NodeError> {
        let bytes = std::fs::read(path)
            .map_err(|e| NodeError::KeyFile(format!("{}: {e}", path.display())))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| NodeError::KeyFile("invalid key file: expected 32 bytes".into()))?;
        Ok(Self::from_signing_key(peer_id, SigningKey::from_bytes(&arr)))
    }

    pub fn load_or_generate(peer_id: &str, path: &Path) -> Result<Self, NodeError> {
        if path.exists() {
            let id = Self::load(peer_id, path)?;
            tracing::info!(
                peer = %id.peer_id,
                public_key = %hex::encode(id.verifying_key.to_bytes()),
                "Loaded identity from {:?}", path,
            );
            Ok(id)
        } else {
            let id = Self::generate(peer_id);
            id.save(path)?;
            tracing::info!(
                peer = %id.peer_id,
                public_key = %hex::encode(id.verifying_key.to_bytes()),
                "Generated new identity, saved to {:?}", path,
            );
            Ok(id)
        }
    }
}
