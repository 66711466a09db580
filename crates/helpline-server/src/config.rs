//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development. A `.env` file in the working
//! directory is read first when present.

use std::net::SocketAddr;
use std::path::PathBuf;

use helpline_shared::constants::{
    DEFAULT_HISTORY_FILE, DEFAULT_HTTP_PORT, DEFAULT_TRANSCRIPT_RECIPIENT, MAX_MESSAGE_SIZE,
};

const DEFAULT_ALLOWED_ORIGINS: &[&str] =
    &["http://localhost:5500", "https://bimmerplug-work.onrender.com"];

const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP / WebSocket server.
    /// Env: `HTTP_ADDR`, or `PORT` to only change the port.
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Path of the chat history snapshot.
    /// Env: `HISTORY_FILE`
    /// Default: `./chatHistory.json`
    pub history_path: PathBuf,

    /// Directory served as static assets (falls back to its `index.html`).
    /// Env: `STATIC_DIR`
    /// Default: `./public`
    pub static_dir: PathBuf,

    /// Browser origins allowed by CORS.
    /// Env: `CORS_ORIGINS` (comma-separated)
    /// Default: `http://localhost:5500`, `https://bimmerplug-work.onrender.com`
    pub allowed_origins: Vec<String>,

    /// Where chat transcripts are emailed.
    /// Env: `TRANSCRIPT_TO`
    pub transcript_recipient: String,

    /// Mail account; also the transcript's `from` address.
    /// Env: `EMAIL_USER`
    pub email_user: Option<String>,

    /// Mail account password / API key.
    /// Env: `EMAIL_PASS`
    pub email_pass: Option<String>,

    /// HTTP mail relay endpoint. Takes precedence over SMTP when set.
    /// Env: `MAIL_API_URL`
    pub mail_api_url: Option<String>,

    /// SMTP server used when `EMAIL_USER` and `EMAIL_PASS` are both set.
    /// Env: `SMTP_HOST`
    /// Default: `smtp.gmail.com`
    pub smtp_host: String,

    /// Largest accepted WebSocket message, in bytes.
    /// Env: `MAX_MESSAGE_SIZE`
    /// Default: 50 MiB
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            history_path: PathBuf::from(DEFAULT_HISTORY_FILE),
            static_dir: PathBuf::from("./public"),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
            transcript_recipient: DEFAULT_TRANSCRIPT_RECIPIENT.to_string(),
            email_user: None,
            email_pass: None,
            mail_api_url: None,
            smtp_host: DEFAULT_SMTP_HOST.to_string(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

// Hand-written so the mail password never reaches the logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("history_path", &self.history_path)
            .field("static_dir", &self.static_dir)
            .field("allowed_origins", &self.allowed_origins)
            .field("transcript_recipient", &self.transcript_recipient)
            .field("email_user", &self.email_user)
            .field("email_pass", &self.email_pass.as_ref().map(|_| "<redacted>"))
            .field("mail_api_url", &self.mail_api_url)
            .field("smtp_host", &self.smtp_host)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to read .env file");
            }
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        } else if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(path) = non_empty(lookup("HISTORY_FILE")) {
            config.history_path = PathBuf::from(path);
        }

        if let Some(dir) = non_empty(lookup("STATIC_DIR")) {
            config.static_dir = PathBuf::from(dir);
        }

        if let Some(origins) = lookup("CORS_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }

        if let Some(to) = non_empty(lookup("TRANSCRIPT_TO")) {
            config.transcript_recipient = to;
        }

        config.email_user = non_empty(lookup("EMAIL_USER"));
        config.email_pass = non_empty(lookup("EMAIL_PASS"));
        config.mail_api_url = non_empty(lookup("MAIL_API_URL"));

        if let Some(host) = non_empty(lookup("SMTP_HOST")) {
            config.smtp_host = host;
        }

        if let Some(val) = lookup("MAX_MESSAGE_SIZE") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_message_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_MESSAGE_SIZE, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
