//! Sync errors

use thiserror::Error;

/// Errors raised while fetching or decoding telemetry.
///
/// None of these are fatal to the orchestrator: every failure path degrades to
/// an empty fallback for the affected collection.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{resource} returned HTTP {status}")]
    Status { resource: String, status: u16 },

    #[error("Malformed payload: expected {expected}, got {found}")]
    Shape {
        expected: &'static str,
        found: &'static str,
    },

    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Resource not available: {0}")]
    Unavailable(String),

    #[error("Sync engine has shut down")]
    Closed,
}

impl SyncError {
    /// Build a shape error for a payload that isn't the container we wanted.
    pub fn shape(expected: &'static str, found: &serde_json::Value) -> Self {
        SyncError::Shape {
            expected,
            found: json_kind(found),
        }
    }
}

/// Short name of a JSON value's kind, for log lines and errors.
pub fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
