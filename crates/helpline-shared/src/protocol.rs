//! WebSocket event protocol.
//!
//! Every text frame carries one JSON envelope `{"event": <name>, "data": <payload>}`.
//! Inbound payloads are lenient: each field that is missing or has the wrong
//! JSON type falls back to its own default, and the rest of the payload is
//! kept.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    DEFAULT_ATTACHMENT_NAME, DEFAULT_MIME_TYPE, EVENT_CHAT_FILE, EVENT_CHAT_MESSAGE,
    EVENT_END_CHAT, EVENT_TYPING,
};
use crate::error::ProtocolError;
use crate::sanitize::sanitize_text;
use crate::types::{
    parse_timestamp, timestamp_from_millis, ChatEntry, FileMessage, Role, TextMessage,
};

/// Events sent by a participant.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(IncomingMessage),
    File(IncomingFile),
    /// Transient "is typing" hint, relayed verbatim.
    Typing(Value),
    EndChat,
}

/// `chat message` payload as sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingMessage {
    pub from: Option<String>,
    pub text: Option<String>,
}

/// `chat file` payload as sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingFile {
    pub from: Option<String>,
    pub name: Option<String>,
    /// The payload's `type` field.
    pub mime_type: Option<String>,
    pub data: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    /// Parse one inbound text frame.
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        let Envelope { event, data } = serde_json::from_str(frame)?;

        match event.as_str() {
            EVENT_CHAT_MESSAGE => Ok(Self::Message(IncomingMessage::from_payload(&data))),
            EVENT_CHAT_FILE => Ok(Self::File(IncomingFile::from_payload(&data))),
            EVENT_TYPING => Ok(Self::Typing(data)),
            EVENT_END_CHAT => Ok(Self::EndChat),
            _ => Err(ProtocolError::UnknownEvent(event)),
        }
    }
}

/// A string field of an object payload; absent for any other JSON type.
fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Clients may send either an ISO string or epoch milliseconds (`Date.now()`).
fn timestamp_field(data: &Value) -> Option<String> {
    match data.get("timestamp")? {
        Value::String(raw) => Some(raw.clone()),
        Value::Number(n) => n
            .as_i64()
            .and_then(timestamp_from_millis)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl IncomingMessage {
    pub fn from_payload(data: &Value) -> Self {
        Self {
            from: str_field(data, "from"),
            text: str_field(data, "text"),
        }
    }

    /// Build the stored entry: sanitized text, server-assigned timestamp.
    pub fn into_entry(self, now: DateTime<Utc>) -> ChatEntry {
        ChatEntry::Text(TextMessage {
            from: Role::from_label(self.from.as_deref()),
            text: sanitize_text(self.text.as_deref().unwrap_or_default()),
            timestamp: now,
        })
    }
}

impl IncomingFile {
    pub fn from_payload(data: &Value) -> Self {
        Self {
            from: str_field(data, "from"),
            name: str_field(data, "name"),
            mime_type: str_field(data, "type"),
            data: str_field(data, "data"),
            timestamp: timestamp_field(data),
        }
    }

    /// Build the stored entry, substituting defaults for absent fields.
    ///
    /// A client timestamp is kept only if it parses; otherwise `now` is used.
    pub fn into_entry(self, now: DateTime<Utc>) -> ChatEntry {
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now);

        ChatEntry::File(FileMessage {
            from: Role::from_label(self.from.as_deref()),
            name: non_empty(self.name).unwrap_or_else(|| DEFAULT_ATTACHMENT_NAME.to_string()),
            mime_type: non_empty(self.mime_type).unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            data: self.data.unwrap_or_default(),
            timestamp,
        })
    }
}

/// Events sent to participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full history, sent once to a newly connected participant.
    #[serde(rename = "chat history")]
    History(Vec<ChatEntry>),

    #[serde(rename = "chat message")]
    Message(ChatEntry),

    #[serde(rename = "chat file")]
    File(ChatEntry),

    #[serde(rename = "typing")]
    Typing(Value),

    #[serde(rename = "chat ended")]
    ChatEnded {},
}

impl ServerEvent {
    /// Wrap a freshly stored entry in the broadcast event matching its kind.
    pub fn for_entry(entry: ChatEntry) -> Self {
        if entry.is_file() {
            ServerEvent::File(entry)
        } else {
            ServerEvent::Message(entry)
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
