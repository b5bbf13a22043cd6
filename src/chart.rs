//! Rolling chart windows
//!
//! Each graph keeps the trailing `max_points` samples of a few live channels.
//! Points are keyed by an arrival counter rather than wall-clock time, so a
//! burst of updates followed by a quiet minute still plots evenly.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::domain::LiveState;

/// one plotted line: display label plus the live-state channel it reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub label: String,
    pub key: String,
}

impl Series {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

/// one accepted sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    /// arrival sequence number within this window
    pub index: u64,
    /// label -> value; series without a valid value this cycle are absent
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl ChartPoint {
    pub fn get(&self, label: &str) -> Option<f64> {
        self.values.get(label).copied()
    }
}

/// read-only copy of a window for presentation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSnapshot {
    pub title: String,
    pub series: Vec<String>,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Clone)]
pub struct RollingChart {
    title: String,
    series: Vec<Series>,
    max_points: usize,
    next_index: u64,
    points: VecDeque<ChartPoint>,
}

impl RollingChart {
    pub fn new(title: impl Into<String>, series: Vec<Series>, max_points: usize) -> Self {
        Self {
            title: title.into(),
            series,
            max_points,
            next_index: 0,
            points: VecDeque::with_capacity(max_points),
        }
    }

    /// Sample the live state. Returns false (and records nothing) when none
    /// of this window's channels carry a finite number.
    pub fn observe(&mut self, live: &LiveState) -> bool {
        let values: BTreeMap<String, f64> = self
            .series
            .iter()
            .filter_map(|s| live.numeric(&s.key).map(|v| (s.label.clone(), v)))
            .collect();

        if values.is_empty() {
            return false;
        }

        let index = self.next_index;
        self.next_index += 1;
        self.points.push_back(ChartPoint { index, values });
        while self.points.len() > self.max_points {
            self.points.pop_front();
        }
        true
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn points(&self) -> impl Iterator<Item = &ChartPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn snapshot(&self) -> ChartSnapshot {
        ChartSnapshot {
            title: self.title.clone(),
            series: self.series.iter().map(|s| s.label.clone()).collect(),
            points: self.points.iter().cloned().collect(),
        }
    }
}

/// The independent windows fed from the same live state.
#[derive(Debug, Clone, Default)]
pub struct ChartSet {
    charts: Vec<RollingChart>,
}

impl ChartSet {
    pub fn new(charts: Vec<RollingChart>) -> Self {
        Self { charts }
    }

    /// Feed every chart; true if any of them took a point.
    pub fn observe(&mut self, live: &LiveState) -> bool {
        let mut sampled = false;
        for chart in &mut self.charts {
            if chart.observe(live) {
                tracing::trace!(chart = chart.title(), points = chart.len(), "chart sample");
                sampled = true;
            }
        }
        sampled
    }

    pub fn get(&self, title: &str) -> Option<&RollingChart> {
        self.charts.iter().find(|c| c.title == title)
    }

    pub fn snapshot(&self) -> Vec<ChartSnapshot> {
        self.charts.iter().map(RollingChart::snapshot).collect()
    }
}
