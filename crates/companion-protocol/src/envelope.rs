use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{LOCAL_SOURCE, MAX_MESSAGE_SIZE, MAX_PEER_ID_LEN, PROTOCOL_VERSION},
    error::ProtocolError,
    hash,
    message::MsgType,
    payload::TypedPayload,
    traits::PersonalityTraits,
};

/// Signed companion envelope.
///
/// JSON on the wire, camelCase keys:
///
/// ```text
/// { version, type, senderId, correlationId, personalityTraits, payload?,
///   timestamp, publicKey, checksum, signature }
/// ```
///
/// `checksum` is hex keccak256 of `signing_bytes()`; `signature` is a base64
/// Ed25519 signature over the same bytes. Both must verify before anything
/// in the envelope is trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub version: u32,
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub sender_id: String,
    /// Matches a reply to the request that caused it.
    pub correlation_id: u64,
    #[serde(default)]
    pub personality_traits: PersonalityTraits,
    /// Base64 of a CBOR-encoded typed payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Unix microseconds (sender wall clock).
    pub timestamp: u64,
    /// Base64 Ed25519 verifying key of the sender.
    pub public_key: String,
    pub checksum: String,
    pub signature: String,
}

impl Envelope {
    /// Serialize all covered fields into a canonical byte string.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.msg_type.as_u16().to_be_bytes());
        push_str(&mut buf, &self.sender_id);
        buf.extend_from_slice(&self.correlation_id.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.personality_traits.canonical_bytes());
        match &self.payload {
            Some(p) => {
                buf.push(1);
                push_str(&mut buf, p);
            }
            None => buf.push(0),
        }
        push_str(&mut buf, &self.public_key);
        buf
    }

    /// Compute checksum and signature in place.
    pub fn sign(&mut self, key: &SigningKey) {
        let bytes = self.signing_bytes();
        self.checksum = hash::digest_hex(&bytes);
        self.signature = B64.encode(hash::sign(&bytes, key));
    }

    /// Build, sign, and return a new envelope.
    pub fn build(
        msg_type: MsgType,
        sender_id: &str,
        correlation_id: u64,
        personality_traits: PersonalityTraits,
        payload: Option<Vec<u8>>,
        timestamp: u64,
        key: &SigningKey,
    ) -> Self {
        let mut env = Self {
            version: PROTOCOL_VERSION,
            msg_type,
            sender_id: sender_id.to_string(),
            correlation_id,
            personality_traits,
            payload: payload.map(|p| B64.encode(p)),
            timestamp,
            public_key: B64.encode(key.verifying_key().to_bytes()),
            checksum: String::new(),
            signature: String::new(),
        };
        env.sign(key);
        env
    }

    /// Build an envelope carrying a typed payload.
    pub fn with_payload<P: TypedPayload>(
        sender_id: &str,
        correlation_id: u64,
        payload: &P,
        timestamp: u64,
        key: &SigningKey,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::build(
            P::MSG_TYPE,
            sender_id,
            correlation_id,
            PersonalityTraits::new(),
            Some(payload.encode()?),
            timestamp,
            key,
        ))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = serde_json::to_vec(self).map_err(|e| ProtocolError::Json(e.to_string()))?;
        Self::check_size(bytes.len())?;
        Ok(bytes)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        Self::check_size(data.len())?;
        serde_json::from_slice(data).map_err(|e| ProtocolError::Json(e.to_string()))
    }

    /// Check total encoded size is within MAX_MESSAGE_SIZE.
    pub fn check_size(encoded_len: usize) -> Result<(), ProtocolError> {
        if encoded_len > MAX_MESSAGE_SIZE {
            Err(ProtocolError::EnvelopeTooLarge {
                size: encoded_len,
                limit: MAX_MESSAGE_SIZE,
            })
        } else {
            Ok(())
        }
    }

    /// Decode the embedded sender key.
    pub fn sender_key(&self) -> Result<VerifyingKey, ProtocolError> {
        let raw = B64
            .decode(&self.public_key)
            .map_err(|e| ProtocolError::Base64(e.to_string()))?;
        let arr: [u8; 32] = raw.try_into().map_err(|_| ProtocolError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&arr).map_err(|_| ProtocolError::InvalidPublicKey)
    }

    /// Validate all envelope invariants.
    ///
    /// `pinned_key`    : key already registered for `sender_id`, if any
    /// `now_micros`    : current wall-clock time in microseconds
    /// `tolerance_secs`: accepted clock skew
    ///
    /// Returns the sender's verifying key on success.
    pub fn verify(
        &self,
        pinned_key: Option<&VerifyingKey>,
        now_micros: u64,
        tolerance_secs: u64,
    ) -> Result<VerifyingKey, ProtocolError> {
        // Rule 1: version
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }

        // Rule 2: sender identifier
        validate_peer_id(&self.sender_id)?;

        // Rule 3: checksum over the covered fields
        let bytes = self.signing_bytes();
        let checksum = hex::decode(&self.checksum).map_err(|e| ProtocolError::Hex(e.to_string()))?;
        if !hash::verify_digest(&bytes, &checksum) {
            return Err(ProtocolError::ChecksumMismatch);
        }

        // Rule 4: the embedded key must match the pinned one
        let key = self.sender_key()?;
        if let Some(pinned) = pinned_key {
            if pinned != &key {
                return Err(ProtocolError::KeyMismatch(self.sender_id.clone()));
            }
        }

        // Rule 5: signature
        let sig = B64
            .decode(&self.signature)
            .map_err(|e| ProtocolError::Base64(e.to_string()))?;
        if !hash::verify_with_key(&bytes, &sig, &key) {
            return Err(ProtocolError::InvalidSignature);
        }

        // Rule 6: timestamp tolerance
        let ts_secs = self.timestamp / 1_000_000;
        let now_secs = now_micros / 1_000_000;
        let delta = ts_secs.abs_diff(now_secs);
        if delta > tolerance_secs {
            return Err(ProtocolError::TimestampOutOfTolerance {
                delta_secs: delta,
                tolerance_secs,
            });
        }

        Ok(key)
    }

    /// Raw payload bytes, if present.
    pub fn payload_bytes(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.payload
            .as_ref()
            .map(|p| B64.decode(p).map_err(|e| ProtocolError::Base64(e.to_string())))
            .transpose()
    }

    /// Decode the typed payload. The envelope type must match `P`.
    pub fn decode_payload<P: TypedPayload>(&self) -> Result<P, ProtocolError> {
        if self.msg_type != P::MSG_TYPE {
            return Err(ProtocolError::PayloadParseError {
                msg_type: self.msg_type.as_u16(),
                reason: format!("expected {} payload", P::MSG_TYPE),
            });
        }
        let bytes = self
            .payload_bytes()?
            .ok_or(ProtocolError::MissingPayload(self.msg_type.as_u16()))?;
        P::decode(&bytes)
    }
}

/// Peer identifiers: 1–128 printable ASCII characters, and never the
/// reserved local source tag.
pub fn validate_peer_id(id: &str) -> Result<(), ProtocolError> {
    if id.is_empty() || id.len() > MAX_PEER_ID_LEN {
        return Err(ProtocolError::InvalidSender(format!("bad length {}", id.len())));
    }
    if !id.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ProtocolError::InvalidSender(id.to_string()));
    }
    if id == LOCAL_SOURCE {
        return Err(ProtocolError::InvalidSender("reserved id".into()));
    }
    Ok(())
}

fn push_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
