use companion_protocol::ProtocolError;
use thiserror::Error;

/// Node-level failures.
///
/// `RateLimited`, `PrivacyDenied` and `Timeout` are soft outcomes: the
/// exchange coordinator and the dialog backend turn them into "no data".
/// Only configuration errors reach callers of `select_best_response`.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("rate limited: peer {0} was contacted within the cooldown window")]
    RateLimited(String),

    #[error("privacy settings forbid sharing with {0}")]
    PrivacyDenied(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid local personality: {0}")]
    InvalidPersonality(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("key file error: {0}")]
    KeyFile(String),
}

impl NodeError {
    /// True for outcomes the coordinator absorbs into "no data".
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::PrivacyDenied(_) | Self::Timeout(_) | Self::Transport(_)
        )
    }

    /// True for errors that must propagate to the caller.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidPersonality(_) | Self::InvalidConfig(_))
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
