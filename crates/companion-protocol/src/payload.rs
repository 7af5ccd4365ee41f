use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    dialog::{DialogContext, DialogResponse, ResponseSource},
    error::ProtocolError,
    message::MsgType,
};

// ============================================================================
// Typed payloads (CBOR inside the envelope's base64 `payload` field)
// ============================================================================

/// DIALOG_QUERY (0x03): ask a peer to suggest a line for `context`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogQueryPayload {
    pub context: DialogContext,
}

/// DIALOG_REPLY (0x04): a peer's candidate for an earlier query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogReplyPayload {
    pub response: DialogResponse,
}

/// SELECTION_ANNOUNCE (0x05): which candidate won a selection round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionAnnouncePayload {
    pub trigger: String,
    pub text: String,
    pub source: ResponseSource,
    pub score: f64,
}

/// Payloads that know which message type carries them.
pub trait TypedPayload: Serialize + DeserializeOwned {
    const MSG_TYPE: MsgType;

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::PayloadParseError {
            msg_type: Self::MSG_TYPE.as_u16(),
            reason: e.to_string(),
        })
    }
}

impl TypedPayload for DialogQueryPayload {
    const MSG_TYPE: MsgType = MsgType::DialogQuery;
}

impl TypedPayload for DialogReplyPayload {
    const MSG_TYPE: MsgType = MsgType::DialogReply;
}

impl TypedPayload for SelectionAnnouncePayload {
    const MSG_TYPE: MsgType = MsgType::SelectionAnnounce;
}
