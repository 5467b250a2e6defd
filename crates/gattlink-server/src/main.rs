//! # gattlink-server
//!
//! HTTP server driving a single BLE central session.
//!
//! This binary provides:
//! - REST API for scanning, connecting and GATT access
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development (simulated peripherals)
//! cargo run --package gattlink-server
//!
//! # On a host with BlueZ
//! cargo run --package gattlink-server --features bluetooth
//! ```
//!
//! The configuration file is read from `GATTLINK_CONFIG` when set, otherwise
//! from the platform config directory.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use anyhow::Context;
use gattlink_core::default_config_path;
use gattlink_server::{api, logging, state};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("GATTLINK_CONFIG")
        .map_or_else(default_config_path, PathBuf::from);
    let config = state::load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    logging::init(config.server.production)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting gattlink-server");
    info!(
        path = %config_path.display(),
        bind = %config.server.bind_address,
        "configuration loaded"
    );

    let session = state::open_session(config.session.clone()).await?;
    let app_state = state::AppState::new(session);
    let app = api::create_router(app_state.clone());

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;

    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down session");
    app_state.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
