//! # murmur
//!
//! Realtime chat and presence fan-out server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! murmur
//!
//! # Run with a config file at ./murmur.toml
//! murmur
//!
//! # Run with environment variables
//! MURMUR_PORT=8080 MURMUR_BUS_ADDRESS=redis://redis:6379/ murmur
//! ```

use anyhow::{Context, Result};
use murmur_bus::{Bus, RedisBus};
use murmur_presence::{PresenceStore, RedisPresence};
use murmur_server::{fanout, handlers, metrics, registry::SessionRegistry, AppState, Config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    info!(
        port = config.port,
        bus = %config.bus.address,
        topic = %config.bus.topic,
        "starting murmur"
    );

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Unreachable backends are fatal: abort before accepting connections.
    let bus: Arc<dyn Bus> = Arc::new(
        RedisBus::connect(&config.bus.address)
            .await
            .context("failed to connect to message bus")?,
    );

    let presence: Arc<dyn PresenceStore> = Arc::new(
        RedisPresence::connect(&config.presence.address)
            .await
            .context("failed to connect to presence store")?
            .with_namespace(config.presence.namespace.as_str())
            .with_ttl(config.presence.ttl()),
    );

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    let state = Arc::new(AppState {
        config: config.clone(),
        registry: SessionRegistry::new(),
        bus,
        presence,
        shutdown: shutdown.clone(),
        tracker: tracker.clone(),
    });

    // Fan-out engine runs for the life of the process.
    {
        let state = state.clone();
        let cancel = shutdown.child_token();
        tracker.spawn(async move {
            if let Err(e) = fanout::run(state, cancel).await {
                error!(error = %e, "fan-out engine terminated");
            }
        });
    }

    // Translate SIGINT/SIGTERM into root cancellation.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    handlers::run_server(state.clone()).await?;

    // Drain: stop the fan-out and every session, then wait out the budget.
    shutdown.cancel();
    state.registry.close_all();
    tracker.close();

    if tokio::time::timeout(config.shutdown.deadline(), tracker.wait())
        .await
        .is_err()
    {
        warn!(
            deadline_ms = config.shutdown.deadline_ms,
            "shutdown deadline exceeded, abandoning remaining tasks"
        );
    }

    info!("murmur stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
