//! # helpline-shared
//!
//! Types shared between the history store and the relay server: the chat
//! entry model, the WebSocket event protocol, and text sanitization.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod sanitize;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ClientEvent, IncomingFile, IncomingMessage, ServerEvent};
pub use types::{ChatEntry, FileMessage, ParticipantId, Role, TextMessage};
