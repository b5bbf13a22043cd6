//! Peak summary
//!
//! Folds the peak-event history into one highest-value record per parameter.

use std::collections::HashMap;

use serde::Serialize;

use crate::domain::PeakEvent;

/// validated best-so-far record for one parameter
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakRecord {
    pub parameter: String,
    pub value: f64,
    pub timestamp: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

/// one record per parameter, in order of first appearance
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PeakSummary {
    records: Vec<PeakRecord>,
}

/// a row of a fixed parameter list: either a reduced peak or explicit absence
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeakSlot {
    Reading(PeakRecord),
    NoData { parameter: String },
}

impl PeakSlot {
    pub fn parameter(&self) -> &str {
        match self {
            PeakSlot::Reading(record) => &record.parameter,
            PeakSlot::NoData { parameter } => parameter,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            PeakSlot::Reading(record) => Some(record.value),
            PeakSlot::NoData { .. } => None,
        }
    }
}

/// Reduce peak events to the highest value seen per parameter.
///
/// Events with no parameter or a value that isn't a finite number are skipped.
/// A record is only replaced on a strictly greater value, so ties keep the
/// earliest event. Pure: calling it again on the same (or a longer) history
/// never lowers a parameter's value.
pub fn reduce<'a, I>(events: I) -> PeakSummary
where
    I: IntoIterator<Item = &'a PeakEvent>,
{
    let mut records: Vec<PeakRecord> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for event in events {
        let (Some(parameter), Some(value)) = (event.parameter.as_ref(), event.numeric_value())
        else {
            continue;
        };

        let record = PeakRecord {
            parameter: parameter.clone(),
            value,
            timestamp: event.timestamp.clone(),
            date: event.date.clone(),
            time: event.time.clone(),
        };

        match slots.get(parameter) {
            Some(&idx) => {
                if value > records[idx].value {
                    records[idx] = record;
                }
            }
            None => {
                slots.insert(parameter.clone(), records.len());
                records.push(record);
            }
        }
    }

    PeakSummary { records }
}

impl PeakSummary {
    pub fn get(&self, parameter: &str) -> Option<&PeakRecord> {
        self.records.iter().find(|r| r.parameter == parameter)
    }

    pub fn records(&self) -> &[PeakRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lay the summary over a known parameter list.
    ///
    /// Output follows `parameters` order; parameters with no valid event
    /// become `PeakSlot::NoData`. Parameters outside the list are left out.
    pub fn overlay<S: AsRef<str>>(&self, parameters: &[S]) -> Vec<PeakSlot> {
        parameters
            .iter()
            .map(|name| match self.get(name.as_ref()) {
                Some(record) => PeakSlot::Reading(record.clone()),
                None => PeakSlot::NoData {
                    parameter: name.as_ref().to_string(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn values(summary: &PeakSummary) -> Vec<(&str, f64)> {
        summary
            .records()
            .iter()
            .map(|r| (r.parameter.as_str(), r.value))
            .collect()
    }

    #[test]
    fn test_highest_per_parameter() {
        let events = vec![
            PeakEvent::new("Temperature", 12.5),
            PeakEvent::new("Temperature", 9.0),
            PeakEvent::new("Humidity", 40.0),
        ];

        let summary = reduce(&events);
        assert_eq!(values(&summary), vec![("Temperature", 12.5), ("Humidity", 40.0)]);
    }

    #[test]
    fn test_order_is_first_appearance_not_value() {
        let events = vec![
            PeakEvent::new("LDR", 1.0),
            PeakEvent::new("G-Force", 8.0),
            PeakEvent::new("LDR", 2.0),
        ];

        let summary = reduce(&events);
        assert_eq!(values(&summary), vec![("LDR", 2.0), ("G-Force", 8.0)]);
    }

    #[test]
    fn test_tie_keeps_earliest_record() {
        let events = vec![
            PeakEvent::new("Height", 1.5).at("2025-01-01", "10:00:00"),
            PeakEvent::new("Height", 1.5).at("2025-01-01", "11:00:00"),
        ];

        let summary = reduce(&events);
        assert_eq!(summary.get("Height").unwrap().time.as_deref(), Some("10:00:00"));
    }

    #[test]
    fn test_malformed_events_are_skipped() {
        let mut no_param = PeakEvent::new("x", 99.0);
        no_param.parameter = None;
        let mut bad_value = PeakEvent::new("FLEX", 0.0);
        bad_value.value = json!("n/a");
        let mut null_value = PeakEvent::new("FLEX", 0.0);
        null_value.value = Value::Null;

        let events = vec![no_param, bad_value, null_value, PeakEvent::new("FLEX", 3.0)];
        let summary = reduce(&events);

        assert_eq!(values(&summary), vec![("FLEX", 3.0)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(reduce(&Vec::new()).is_empty());
    }

    #[test]
    fn test_idempotent_and_monotonic() {
        let mut events = Vec::new();
        let mut previous = reduce(&events);

        for i in 0..40u32 {
            let param = ["Temperature", "Humidity", "G-Force"][(i % 3) as usize];
            // zig-zag values so later events are sometimes lower
            let value = f64::from((i * 7) % 11);
            events.push(PeakEvent::new(param, value));

            let current = reduce(&events);
            assert_eq!(current, reduce(&events));

            for old in previous.records() {
                let now = current.get(&old.parameter).unwrap();
                assert!(now.value >= old.value);
            }

            let max = events
                .iter()
                .filter(|e| e.parameter.as_deref() == Some(param))
                .filter_map(PeakEvent::numeric_value)
                .fold(f64::MIN, f64::max);
            assert_eq!(current.get(param).unwrap().value, max);

            previous = current;
        }
    }

    #[test]
    fn test_overlay_marks_missing_parameters() {
        let events = vec![PeakEvent::new("Humidity", 55.0), PeakEvent::new("Pressure", 1.0)];
        let slots = reduce(&events).overlay(&["Temperature", "Humidity"]);

        assert_eq!(slots.len(), 2);
        assert_eq!(
            slots[0],
            PeakSlot::NoData {
                parameter: "Temperature".into()
            }
        );
        assert_eq!(slots[1].value(), Some(55.0));
        assert_eq!(slots[1].parameter(), "Humidity");
    }
}
