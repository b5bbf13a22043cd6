//! ==============================================================================
//! main.rs - telemetry sync host entry point
//! ==============================================================================
//!
//! purpose:
//!     runs the sync engine against a telemetry server and serves the
//!     resulting view to whatever renders it.
//!
//! responsibilities:
//!     - load configuration (config/viewer.toml)
//!     - set up logging
//!     - hydrate from the snapshot api, then follow the push stream
//!     - serve the read-only view on the dashboard port
//!     - shut the engine down cleanly on ctrl-c
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ snapshot    │  │ push stream │  │ view server         │  │
//!     │  │ (4x GET)    │  │ (ndjson)    │  │ (port 3000)         │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │                │                    │ reads       │
//!     │         └───────┬────────┘                    │             │
//!     │           ┌─────┴─────┐   publishes     ┌─────┴─────┐       │
//!     │           │ sync loop ├────────────────►│   view    │       │
//!     │           └───────────┘                 └───────────┘       │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use telemetry_sync::config::ViewerConfig;
use telemetry_sync::server;
use telemetry_sync::snapshot::HttpSnapshotSource;
use telemetry_sync::stream::NdjsonTransport;
use telemetry_sync::sync::{SyncEngine, TelemetryState};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Telemetry Sync Host");
    println!("  \"Snapshot once, stream forever\"");
    println!("===========================================================");

    // step 1: load configuration
    let config = ViewerConfig::load_or_default();
    config.print_summary();

    // step 2: logging (RUST_LOG overrides the config level)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: build the engine
    let source = HttpSnapshotSource::new(&config.server.base_url, config.request_timeout())
        .context("failed to build snapshot client")?;
    let transport = NdjsonTransport::new(
        config.stream_url(),
        config.reconnect_delay(),
        config.stream.capacity,
    );
    let state = TelemetryState::new(
        config.history.peak_capacity,
        config.history.raw_capacity,
        config.chart_set(),
    );

    let (handle, engine) = SyncEngine::new(source, transport, state)
        .show_stream_data(config.logging.show_stream_data)
        .spawn();
    tracing::info!("hydrating from {}", config.server.base_url);

    // step 4: view server in background
    if config.dashboard.enabled {
        let bind = config.dashboard.bind.clone();
        let web_handle = handle.clone();
        let parameters = config.peaks.parameters.clone();
        tokio::spawn(async move {
            tracing::info!("view live at http://{}/api/view", bind);
            if let Err(e) = server::run_server(&bind, web_handle, parameters).await {
                tracing::error!("view server error: {:#}", e);
            }
        });
    }

    // step 5: run until ctrl-c
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    println!("\n[SHUTDOWN] Closing push subscription...");

    if let Err(e) = handle.shutdown().await {
        tracing::warn!("engine already stopped: {}", e);
    }
    engine.await.context("sync engine task panicked")?;

    Ok(())
}
