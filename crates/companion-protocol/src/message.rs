use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// All companion message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u16)]
pub enum MsgType {
    /// "Send me your personality."
    PersonalityRequest = 0x01,
    /// "Here is my personality." Carries traits.
    PersonalityResponse = 0x02,
    /// "Suggest a line for this dialog context." Carries a DialogQuery payload.
    DialogQuery = 0x03,
    /// Candidate line for a DialogQuery. Carries a DialogReply payload.
    DialogReply = 0x04,
    /// "This is the line I picked." Fire-and-forget.
    SelectionAnnounce = 0x05,
}

impl MsgType {
    pub fn from_u16(v: u16) -> Result<Self, ProtocolError> {
        match v {
            0x01 => Ok(Self::PersonalityRequest),
            0x02 => Ok(Self::PersonalityResponse),
            0x03 => Ok(Self::DialogQuery),
            0x04 => Ok(Self::DialogReply),
            0x05 => Ok(Self::SelectionAnnounce),
            other => Err(ProtocolError::UnknownMsgType(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns true if the envelope's `personalityTraits` field is meaningful.
    pub fn carries_traits(self) -> bool {
        matches!(self, Self::PersonalityResponse)
    }

    /// Returns true if this message type has a typed (CBOR) payload.
    pub fn has_payload(self) -> bool {
        matches!(self, Self::DialogQuery | Self::DialogReply | Self::SelectionAnnounce)
    }

    /// Returns true if this message answers an earlier request and is
    /// matched to a waiter by correlation id.
    pub fn is_reply(self) -> bool {
        matches!(self, Self::PersonalityResponse | Self::DialogReply)
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PersonalityRequest => "PERSONALITY_REQUEST",
            Self::PersonalityResponse => "PERSONALITY_RESPONSE",
            Self::DialogQuery => "DIALOG_QUERY",
            Self::DialogReply => "DIALOG_REPLY",
            Self::SelectionAnnounce => "SELECTION_ANNOUNCE",
        };
        write!(f, "{}", name)
    }
}
