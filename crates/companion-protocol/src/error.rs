use thiserror::Error;

/// Every variant is a verification failure from the receiver's point of
/// view: the envelope is dropped and never reaches the cache.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("unknown message type: {0:#04x}")]
    UnknownMsgType(u16),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("sender key does not match the key registered for {0}")]
    KeyMismatch(String),

    #[error("timestamp out of tolerance: delta {delta_secs}s exceeds {tolerance_secs}s")]
    TimestampOutOfTolerance {
        delta_secs: u64,
        tolerance_secs: u64,
    },

    #[error("envelope too large: {size} bytes exceeds {limit}")]
    EnvelopeTooLarge { size: usize, limit: usize },

    #[error("invalid sender id: {0}")]
    InvalidSender(String),

    #[error("invalid trait {name}: {reason}")]
    InvalidTrait { name: String, reason: String },

    #[error("payload parse error for msg_type {msg_type:#04x}: {reason}")]
    PayloadParseError { msg_type: u16, reason: String },

    #[error("missing payload for msg_type {0:#04x}")]
    MissingPayload(u16),

    #[error("hex decode error: {0}")]
    Hex(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
