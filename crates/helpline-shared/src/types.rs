use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Role a participant claims in the messages it sends.
///
/// There is no authentication: the role is whatever the client puts in
/// `from`. Missing, empty or unrecognized labels become [`Role::Unknown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    Customer,
    Staff,
    #[default]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Staff => "staff",
            Role::Unknown => "unknown",
        }
    }

    /// Resolve an optional client-supplied label.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some(l) if l.eq_ignore_ascii_case("customer") => Role::Customer,
            Some(l) if l.eq_ignore_ascii_case("staff") => Role::Staff,
            _ => Role::Unknown,
        }
    }
}

impl From<String> for Role {
    fn from(label: String) -> Self {
        Role::from_label(Some(&label))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle for one connected WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A text message as stored in history and broadcast to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub from: Role,
    /// Already sanitized; see [`crate::sanitize::sanitize_text`].
    pub text: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

/// A file attachment as stored in history and broadcast to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMessage {
    pub from: Role,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Opaque payload, typically a base64 data URL. Never inspected.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

/// One unit of chat content.
///
/// Serialized untagged so the snapshot file and the wire format carry the
/// plain `{from, text, timestamp}` / `{from, name, type, data, timestamp}`
/// objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatEntry {
    Text(TextMessage),
    File(FileMessage),
}

impl ChatEntry {
    pub fn role(&self) -> Role {
        match self {
            ChatEntry::Text(m) => m.from,
            ChatEntry::File(f) => f.from,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChatEntry::Text(m) => m.timestamp,
            ChatEntry::File(f) => f.timestamp,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ChatEntry::File(_))
    }
}

/// Current instant truncated to the millisecond precision used on the wire,
/// so entries compare equal after a round trip through the snapshot.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Parse a client-supplied ISO-8601 / RFC 3339 timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(3))
}

/// Epoch milliseconds, as produced by JavaScript's `Date.now()`.
pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// `2024-01-02T03:04:05.678Z`, the shape JavaScript's `toISOString` emits.
///
/// Older snapshots may hold epoch milliseconds instead; those are accepted
/// on read and rewritten as strings.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let parsed = match Value::deserialize(d)? {
            Value::String(raw) => super::parse_timestamp(&raw),
            Value::Number(n) => n.as_i64().and_then(super::timestamp_from_millis),
            _ => None,
        };
        parsed.ok_or_else(|| de::Error::custom("invalid timestamp"))
    }
}
