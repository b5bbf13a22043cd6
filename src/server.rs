//! ==============================================================================
//! server.rs - read-only view server
//! ==============================================================================
//!
//! serves the engine's published view as json. handlers only ever read the
//! latest immutable snapshot; the one write path is asking for a refresh.
//!
//! ```text
//!     GET  /api/view     -> full TelemetryView
//!     GET  /api/peaks    -> peak summary laid over the configured parameters
//!     POST /api/refresh  -> re-run the snapshot fetch
//! ```
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::peaks::PeakSlot;
use crate::sync::{SyncHandle, TelemetryView};

#[derive(Clone)]
struct ViewState {
    handle: SyncHandle,
    parameters: Arc<Vec<String>>,
}

#[derive(Serialize)]
struct PeaksResponse {
    loading: bool,
    parameters: Vec<PeakSlot>,
}

pub fn router(handle: SyncHandle, parameters: Vec<String>) -> Router {
    Router::new()
        .route("/api/view", get(view_handler))
        .route("/api/peaks", get(peaks_handler))
        .route("/api/refresh", post(refresh_handler))
        .layer(CorsLayer::permissive())
        .with_state(ViewState {
            handle,
            parameters: Arc::new(parameters),
        })
}

pub async fn run_server(bind: &str, handle: SyncHandle, parameters: Vec<String>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router(handle, parameters)).await?;
    Ok(())
}

async fn view_handler(State(state): State<ViewState>) -> Json<TelemetryView> {
    Json(state.handle.view().as_ref().clone())
}

/// one row per configured parameter; rows without a valid peak say so
/// explicitly instead of reporting zero
async fn peaks_handler(State(state): State<ViewState>) -> Json<PeaksResponse> {
    let view = state.handle.view();
    Json(PeaksResponse {
        loading: view.loading && view.peak_events.is_empty(),
        parameters: view.peak_summary().overlay(state.parameters.as_slice()),
    })
}

async fn refresh_handler(State(state): State<ViewState>) -> Json<serde_json::Value> {
    match state.handle.refresh().await {
        Ok(()) => Json(serde_json::json!({"status": "ok"})),
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}
