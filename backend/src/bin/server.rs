//! STAMP HTTP Server Binary
//!
//! This is the main entry point for the STAMP REST API server.
//! It loads the configuration, starts the job watchdog, sets up the HTTP
//! router, and starts serving requests.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin stamp-server
//!
//! # With a config file outside the search path
//! STAMP_CONFIG=/etc/stamp/stamp.toml cargo run --bin stamp-server
//! ```
//!
//! # Environment Variables
//!
//! - `STAMP_CONFIG`: Path to a `stamp.toml` (default: search `.`, `backend/`, `..`)
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 8080)
//! - `STAMP_CACHE_ENABLED`, `STAMP_JOB_RETENTION_SECS`, `STAMP_STALL_TIMEOUT_SECS`,
//!   `STAMP_GAP_THRESHOLD_HOURS`: overrides for the matching config keys
//! - `RUST_LOG`: Log filter (default: info)

use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::EnvFilter;

use stamp_rust::config::StampConfig;
use stamp_rust::http::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting STAMP HTTP Server");

    let config = StampConfig::load()?;
    info!(
        cache = config.cache.enabled,
        retention_secs = config.jobs.retention_secs,
        stall_timeout_secs = ?config.jobs.stall_timeout_secs,
        "Configuration loaded"
    );

    let addr: SocketAddr = config.bind_address().parse()?;

    // Create application state and start the stall / retention watchdog
    let state = AppState::from_config(config);
    let _watchdog = state.runner.spawn_watchdog();

    // Create router with all endpoints
    let app = create_router(state);

    info!("Server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
