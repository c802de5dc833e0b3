use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::json;
use std::{env, sync::Arc};
use tokio::{
    net::TcpListener,
    signal,
    sync::{Mutex, RwLock},
};
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{debug, error, info, warn};

use crate::room::registry::Registry;
use crate::room::session::Session;

/// Start the room server.
///
/// This function initializes the shared registry and starts listening for
/// incoming connections. It configures the WebSocket route, the health
/// probe, and the tracing layer that logs incoming requests.
///
/// # Arguments
///
/// * `port` - The port number to listen on.
/// * `listen_addr` - The IP address to listen on.
pub async fn start_server(port: Option<&i32>, listen_addr: Option<&String>) {
    info!("Server starting...");
    let registry = Registry::shared();

    let app_host = match listen_addr {
        Some(address) => address.to_string(),
        None => env::var("APP_HOST").unwrap_or("0.0.0.0".to_string()),
    };
    let app_port = match port {
        Some(port) => port.to_string(),
        None => env::var("APP_PORT").unwrap_or("3001".to_string()),
    };

    debug!("Server configured to accept connections on host {app_host}...");
    debug!("Server configured to listen connections on port {app_port}...");

    let app = app(registry);

    let addr = format!("{}:{}", app_host, app_port);
    if let Ok(listener) = TcpListener::bind(&addr).await {
        let local_addr = listener.local_addr().unwrap();
        info!("Listening on: {}", local_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .unwrap();
    } else {
        error!("Failed to listen on: {addr}");
    }
}

/// The router, with the registry as shared state. Split out so tests can
/// serve it on an ephemeral port.
pub fn app(registry: Arc<RwLock<Registry>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(registry)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}

/// Handler for the WebSocket route.
///
/// Upgrades the connection and hands the socket to a [`Session`]. The room
/// id and display name arrive in the first `join-room` event, not in the
/// URL.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<RwLock<Registry>>>,
) -> impl IntoResponse {
    debug!("Got request on WebSocket route, upgrading connection");
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Drives one WebSocket connection until it closes, then runs the
/// disconnect path so the member's seat outlives the connection by the
/// grace period.
async fn handle_socket(socket: WebSocket, registry: Arc<RwLock<Registry>>) {
    let (sender, mut receiver) = socket.split();

    // Prevent concurrent access to the sender half.
    let sender = Arc::new(Mutex::new(sender));

    let mut session = Session::new(sender);

    while let Some(message) = receiver.next().await {
        match message {
            Ok(message) => {
                session.handle_message(&registry, message).await;
            }
            Err(error) => {
                warn!("Failed to read message from client: {}", error);
                break;
            }
        }
    }

    session.handle_close(&registry).await
}

/// Liveness probe.
async fn health() -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");

    let response = json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": version,
    });
    (StatusCode::OK, Json(response))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
