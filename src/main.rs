//! Drift Lap Server - headless kart time-trial server
//!
//! This is the main entry point. It handles:
//! - The fixed-timestep race session (input replay, drift model, checkpoints)
//! - Lap ghost recording, playback and persistence
//! - WebSocket streaming of snapshots to presentation clients
//! - HTTP endpoints for progress and ghost import/export

mod app;
mod config;
mod game;
mod http;
mod store;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::movement::MovementConfig;
use crate::game::track::Track;
use crate::game::{RaceSession, RunnerConfig, SessionRunner};
use crate::http::build_router;
use crate::util::time::{init_server_time, Clock, MonotonicClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Drift Lap Server");
    info!("Server address: {}", config.server_addr);

    let track = match &config.track_path {
        Some(path) => Track::load(path).await?,
        None => Track::oval(),
    };

    let clock = Arc::new(MonotonicClock::new());
    let movement = MovementConfig {
        fixed_step_ms: config.fixed_step_ms,
        max_substeps: config.max_substeps,
        ..MovementConfig::default()
    };
    let mut session = RaceSession::new(&track, movement, config.input_log_capacity, clock.now_ms());

    if let Some(path) = &config.ghost_path {
        match store::load_if_present(path).await {
            Some(recording) => session.load_ghost(recording, clock.now_ms()),
            None => info!(path = %path.display(), "No ghost loaded, racing without one"),
        }
    }

    let runner_config = RunnerConfig {
        frame_hz: config.frame_hz,
        snapshot_hz: config.snapshot_hz,
        ghost_path: config.ghost_path.clone(),
    };
    let (runner, handle) = SessionRunner::new(session, clock, runner_config, &track.name);

    // Spawn the session loop
    tokio::spawn(runner.run());

    // Create application state and router
    let state = AppState::new(config.clone(), handle);
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
