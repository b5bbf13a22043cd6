use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// current live readings, keyed by sensor channel ("temp", "roll", "g", ...)
///
/// keys the host doesn't know about are kept as-is so a newer telemetry
/// server can add channels without breaking older viewers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveState(Map<String, Value>);

/// how an incoming live payload lands on the current state
#[derive(Clone, Debug, PartialEq)]
pub enum LiveUpdate {
    /// shallow merge: incoming keys overwrite, absent keys keep their value
    Merge(Map<String, Value>),
    /// wholesale swap (snapshot hydration or manual refresh)
    Replace(Map<String, Value>),
}

impl LiveState {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    pub fn apply(&mut self, update: LiveUpdate) {
        match update {
            LiveUpdate::Merge(delta) => {
                for (key, value) in delta {
                    self.0.insert(key, value);
                }
            }
            LiveUpdate::Replace(full) => self.0 = full,
        }
    }

    /// raw value for a channel, exactly as received
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// value for a channel if it carries displayable data
    ///
    /// the sensor firmware reports missing channels as null, "None", "" or
    /// "N/A"; all of those read as no data.
    pub fn reading(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !is_no_data(value))
    }

    /// finite numeric value for a channel (numeric strings included)
    pub fn numeric(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(parse_number)
    }

    /// connectivity flag embedded in the payload, if it is a real boolean
    pub fn connected(&self) -> Option<bool> {
        self.0.get("connected").and_then(Value::as_bool)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// one discrete "parameter reached value at time" record
///
/// stored as received; validation happens when the summary is reduced, so a
/// malformed event can sit in history without poisoning its neighbours.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakEvent {
    /// parameter name (e.g., "Temperature", "G-Force")
    pub parameter: Option<String>,
    /// peak value as sent by the server
    pub value: Value,
    /// opaque display strings
    pub timestamp: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

impl PeakEvent {
    pub fn new(parameter: impl Into<String>, value: f64) -> Self {
        Self {
            parameter: Some(parameter.into()),
            value: Value::from(value),
            timestamp: None,
            date: None,
            time: None,
        }
    }

    pub fn at(mut self, date: &str, time: &str) -> Self {
        self.timestamp = Some(format!("{} {}", date, time));
        self.date = Some(date.to_string());
        self.time = Some(time.to_string());
        self
    }

    /// decode a single event; anything that isn't a JSON object is rejected
    pub fn from_json(value: &Value) -> Result<Self, SyncError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::shape("peak event object", value))?;

        Ok(Self {
            parameter: opaque_string(obj.get("parameter")),
            value: obj.get("value").cloned().unwrap_or(Value::Null),
            timestamp: opaque_string(obj.get("timestamp")),
            date: opaque_string(obj.get("date")),
            time: opaque_string(obj.get("time")),
        })
    }

    /// finite numeric value, or None if the event can't be ranked
    pub fn numeric_value(&self) -> Option<f64> {
        parse_number(&self.value)
    }
}

/// one raw line as ingested by the telemetry server
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub timestamp: String,
    pub data: String,
}

impl RawEntry {
    pub fn new(timestamp: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            data: data.into(),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, SyncError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::shape("raw entry object", value))?;

        Ok(Self {
            timestamp: opaque_string(obj.get("timestamp")).unwrap_or_default(),
            data: opaque_string(obj.get("data")).unwrap_or_default(),
        })
    }
}

/// decode a JSON array item by item
///
/// the container must be an array; individual items that fail `decode` are
/// dropped (and logged) while their siblings go through.
pub fn decode_list<T>(
    value: &Value,
    expected: &'static str,
    decode: impl Fn(&Value) -> Result<T, SyncError>,
) -> Result<Vec<T>, SyncError> {
    let items = value
        .as_array()
        .ok_or_else(|| SyncError::shape(expected, value))?;

    Ok(items
        .iter()
        .filter_map(|item| match decode(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!("dropping {} item: {}", expected, e);
                None
            }
        })
        .collect())
}

/// finite number from a JSON number or numeric string
pub fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn is_no_data(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => matches!(s.as_str(), "" | "None" | "N/A"),
        _ => false,
    }
}

fn opaque_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
