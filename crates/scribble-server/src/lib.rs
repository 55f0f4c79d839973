//! Scribble room server
//!
//! Hosts the [`scribble_core`] engine behind a WebSocket endpoint.
//!
//! ## Routes
//!
//! - `GET /` banner
//! - `GET /health` liveness probe
//! - `GET /stats` room ids and open connection count, as JSON
//! - `GET /ws` WebSocket upgrade; frames follow [`scribble_core::protocol`]

pub mod config;
pub mod hub;
mod ws;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub use config::ServerConfig;
pub use hub::{Hub, HubHandle, HubStats};

/// Build the HTTP router around a running hub.
pub fn router(hub: HubHandle) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(hub)
}

/// Start the hub and serve on `listener` until the server stops.
pub async fn serve(listener: TcpListener, config: &ServerConfig) -> std::io::Result<()> {
    let (hub, handle) = Hub::new(config);
    tokio::spawn(hub.run());

    if let Ok(addr) = listener.local_addr() {
        info!("Scribble server listening on {}", addr);
        info!("WebSocket endpoint: ws://{}/ws", addr);
    }
    axum::serve(listener, router(handle)).await
}

/// Index page
async fn index() -> &'static str {
    "Scribble Room Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// Rooms and connections as seen by the hub
async fn stats(State(hub): State<HubHandle>) -> Result<Json<HubStats>, StatusCode> {
    hub.stats()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}
