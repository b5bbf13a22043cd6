//! # telemetry-sync
//!
//! Keeps a live, bounded, display-ready view of sensor telemetry that arrives
//! through two channels: a pull-based snapshot API and a push event stream.
//!
//! - [`sync`] owns the state and runs the dispatch loop
//! - [`peaks`] reduces peak events to one highest value per parameter
//! - [`history`] holds the capped peak-event and raw-entry histories
//! - [`chart`] keeps rolling windows for time-series graphs
//! - [`connectivity`] folds several status signals into one flag
//!
//! ```rust,ignore
//! use telemetry_sync::{config::ViewerConfig, snapshot::HttpSnapshotSource, stream::NdjsonTransport, sync::*};
//!
//! let config = ViewerConfig::load_or_default();
//! let source = HttpSnapshotSource::new(&config.server.base_url, config.request_timeout())?;
//! let transport = NdjsonTransport::new(config.stream_url(), config.reconnect_delay(), 256);
//! let state = TelemetryState::new(1000, 1000, config.chart_set());
//! let (handle, _task) = SyncEngine::new(source, transport, state).spawn();
//! println!("connected: {}", handle.view().connected);
//! ```

pub mod chart;
pub mod config;
pub mod connectivity;
pub mod domain;
pub mod error;
pub mod history;
pub mod peaks;
pub mod server;
pub mod snapshot;
pub mod stream;
pub mod sync;

pub use error::SyncError;
