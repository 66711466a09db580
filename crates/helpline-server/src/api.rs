use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{HeaderValue, Method},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::session::SessionHandle;
use crate::socket::handle_socket;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    // Unknown paths get index.html so client-side routing keeps working.
    let index = state.config.static_dir.join("index.html");
    let assets = ServeDir::new(&state.config.static_dir).fallback(ServeFile::new(index));

    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .fallback_service(assets)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST];

    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(methods);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    participants: usize,
    entries: usize,
}

async fn ping() -> &'static str {
    "pong"
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ServerError> {
    let stats = state.session.stats().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        participants: stats.participants,
        entries: stats.entries,
    }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let limit = state.config.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state.session))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
