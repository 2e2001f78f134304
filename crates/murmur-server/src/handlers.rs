//! HTTP surface and connection handoff.
//!
//! One WebSocket endpoint upgrades clients into sessions; `/health` and
//! `/ready` serve liveness and readiness probes. Everything a request
//! handler needs hangs off [`AppState`].

use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use murmur_bus::Bus;
use murmur_presence::PresenceStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::Config;
use crate::registry::SessionRegistry;
use crate::session::{self, ConnectParams};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Live sessions on this instance.
    pub registry: SessionRegistry,
    /// Cross-instance message bus.
    pub bus: Arc<dyn Bus>,
    /// Shared presence store.
    pub presence: Arc<dyn PresenceStore>,
    /// Root cancellation; every session holds a child token.
    pub shutdown: CancellationToken,
    /// Tracks sessions and the fan-out engine for bounded shutdown.
    pub tracker: TaskTracker,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

/// Bind the configured address and serve until shutdown.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("murmur listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Serve on an already-bound listener. Split out so tests can bind an
/// ephemeral port first.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Liveness probe.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: round-trips the bus.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.bus.health().await {
        Ok(()) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "status": "ready" })),
        ),
        Err(e) => {
            warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(serde_json::json!({
                    "status": "unavailable",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let ws = ws.max_message_size(state.config.limits.max_message_size);
    let tracker = state.tracker.clone();

    ws.on_upgrade(move |socket| {
        tracker.track_future(session::run_session(socket, params, state))
    })
}
