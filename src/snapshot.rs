//! ==============================================================================
//! snapshot.rs - pull-side hydration
//! ==============================================================================
//!
//! purpose:
//!     fetches the four snapshot resources concurrently and normalizes them
//!     into a `Snapshot` the sync engine can install.
//!
//! ```text
//!         GET /api/live         -> live-state mapping (may carry "connected")
//!         GET /api/peak-events  -> array of peak events
//!         GET /api/raw-data     -> array of raw entries
//!         GET /api/status       -> {"connected": bool}
//! ```
//!
//! failure model:
//!     each fetch stands alone. a network error, bad status or wrong shape
//!     only empties that one collection; the status resource failing leaves
//!     connectivity untouched.
//!
//! ==============================================================================

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::domain::{decode_list, PeakEvent, RawEntry};
use crate::error::{json_kind, SyncError};

/// The four snapshot resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Live,
    PeakEvents,
    RawData,
    Status,
}

impl Resource {
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Live => "/api/live",
            Resource::PeakEvents => "/api/peak-events",
            Resource::RawData => "/api/raw-data",
            Resource::Status => "/api/status",
        }
    }
}

/// Pull side of the telemetry server.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(&self, resource: Resource) -> impl Future<Output = Result<Value, SyncError>> + Send;
}

/// Normalized hydration result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub live: Map<String, Value>,
    pub peak_events: Vec<PeakEvent>,
    pub raw_entries: Vec<RawEntry>,
    /// from the status resource; None if it failed or had no boolean
    pub status: Option<bool>,
}

/// Fetch all four resources at once and wait for every one of them.
pub async fn fetch_snapshot<S: SnapshotSource>(source: &S) -> Snapshot {
    let (live, peaks, raw, status) = tokio::join!(
        source.fetch(Resource::Live),
        source.fetch(Resource::PeakEvents),
        source.fetch(Resource::RawData),
        source.fetch(Resource::Status),
    );

    Snapshot {
        live: or_fallback(Resource::Live, live.and_then(live_map)),
        peak_events: or_fallback(
            Resource::PeakEvents,
            peaks.and_then(|v| decode_list(&v, "peak events", PeakEvent::from_json)),
        ),
        raw_entries: or_fallback(
            Resource::RawData,
            raw.and_then(|v| decode_list(&v, "raw entries", RawEntry::from_json)),
        ),
        status: match status {
            Ok(value) => value.get("connected").and_then(Value::as_bool),
            Err(e) => {
                tracing::debug!("status fetch ignored: {}", e);
                None
            }
        },
    }
}

fn live_map(value: Value) -> Result<Map<String, Value>, SyncError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Shape {
            expected: "live object",
            found: json_kind(&other),
        }),
    }
}

fn or_fallback<T: Default>(resource: Resource, result: Result<T, SyncError>) -> T {
    result.unwrap_or_else(|e| {
        tracing::warn!("{} unavailable, using empty value: {}", resource.path(), e);
        T::default()
    })
}

// ==============================================================================
// http source
// ==============================================================================

#[derive(Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, resource: Resource) -> String {
        format!("{}{}", self.base_url, resource.path())
    }
}

impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, resource: Resource) -> Result<Value, SyncError> {
        let response = self.client.get(self.url(resource)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                resource: resource.path().to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
