/// Application name
pub const APP_NAME: &str = "Helpline";

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Default location of the history snapshot
pub const DEFAULT_HISTORY_FILE: &str = "./chatHistory.json";

/// Display name given to attachments sent without one
pub const DEFAULT_ATTACHMENT_NAME: &str = "attachment";

/// MIME type given to attachments sent without one
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Transcript content for entries with neither text nor a file name
pub const FILE_PLACEHOLDER: &str = "[File]";

/// Subject line of the transcript email
pub const TRANSCRIPT_SUBJECT: &str = "Live Chat Ended - Transcript";

/// Default transcript recipient
pub const DEFAULT_TRANSCRIPT_RECIPIENT: &str = "support@bimmerplug.com";

/// Maximum WebSocket message size in bytes (50 MiB), sized for attachments
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Outbound events buffered per participant before events are dropped
pub const PARTICIPANT_QUEUE_CAPACITY: usize = 256;

/// Commands buffered by the session actor
pub const SESSION_COMMAND_CAPACITY: usize = 1024;

// Inbound wire event names
pub const EVENT_CHAT_MESSAGE: &str = "chat message";
pub const EVENT_CHAT_FILE: &str = "chat file";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_END_CHAT: &str = "end chat";
