pub mod constants;
pub mod dialog;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod message;
pub mod payload;
pub mod traits;

pub use constants::*;
pub use dialog::{DialogContext, DialogResponse, InteractionRecord, ResponseSource};
pub use envelope::{validate_peer_id, Envelope};
pub use error::ProtocolError;
pub use message::MsgType;
pub use payload::{DialogQueryPayload, DialogReplyPayload, SelectionAnnouncePayload, TypedPayload};
pub use traits::{PersonalityTraits, Sanitized};
