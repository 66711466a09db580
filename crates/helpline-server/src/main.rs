//! # helpline-server
//!
//! Live support chat relay.
//!
//! This binary provides:
//! - **WebSocket chat** (`/ws`) for one shared room of customers and staff,
//!   with full history replay on connect
//! - **History snapshot** persisted to a single JSON file on every change
//! - **Transcript email** when a participant ends the chat
//! - **Static assets** for the chat pages, plus `/ping` and `/health`

mod api;
mod config;
mod error;
mod mailer;
mod session;
mod socket;
mod transcript;

use std::sync::Arc;

use helpline_shared::constants::APP_NAME;
use helpline_store::HistoryStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::mailer::TranscriptDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,helpline_server=debug")),
        )
        .init();

    info!("Starting {} chat server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // History snapshot (missing or corrupt file starts an empty history)
    let history = HistoryStore::load(config.history_path.clone()).await;

    // Transcript mailing (HTTP relay if configured, log otherwise)
    let dispatcher = TranscriptDispatcher::from_config(&config);

    // The session task owns the history from here on
    let session = session::spawn_session(history, dispatcher);

    let http_addr = config.http_addr;
    let app_state = AppState {
        session,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
