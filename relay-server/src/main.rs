mod hand_shake;
mod lobby;
mod message_relay;

use crate::lobby::AppState;
use crate::message_relay::run_connection;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Activates error tracing, spawns a watchdog task to evict eventual dead
/// rooms, then sets up the routing system to serve the signaling websocket
/// and a diagnostic room listing. The server listens on port 8080.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true) // Module path (e.g. relay_server::message_relay)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let app_state = AppState::new();
    let watchdog_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1200)); // 20 min
        loop {
            interval.tick().await;
            watchdog_state.evict_dead_rooms().await;
        }
    });

    let app = Router::new()
        .route("/rooms", get(rooms_handler))
        .route("/ws", get(websocket_handler))
        .with_state(app_state)
        .fallback_service(ServeDir::new(".").not_found_service(ServeFile::new("index.html")));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();

    axum::serve(listener, app).await.unwrap();
}

/// Lists the currently active rooms and their player counts.
async fn rooms_handler(State(state): State<Arc<AppState>>) -> String {
    state
        .room_counts()
        .await
        .into_iter()
        .map(|(room_id, players)| format!("Room: {:<30} Players: {:03}", room_id, players))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Upgrades the HTTP request to a websocket and hands the connection off
/// to the per-connection handshake/relay pump.
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_connection(socket, state))
}
