//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `viewer.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the telemetry API lives.
//!     - StreamConfig: push-stream path and reconnect pacing.
//!     - HistoryConfig: capacities of the peak and raw histories.
//!     - PeaksConfig: the fixed parameter list for the peak summary.
//!     - ChartConfig: one entry per rolling graph.
//!     - DashboardConfig: the read-only view server.
//!     - LoggingConfig: log level and stream echo.
//!
//! ==============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::chart::{ChartSet, RollingChart, Series};
use crate::history::DEFAULT_CAPACITY;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ViewerConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub history: HistoryConfig,
    pub peaks: PeaksConfig,
    pub charts: Vec<ChartConfig>,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub path: String,
    pub reconnect_delay_ms: u64,
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub peak_capacity: usize,
    pub raw_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PeaksConfig {
    pub parameters: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChartConfig {
    pub title: String,
    pub max_points: usize,
    pub series: Vec<Series>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_stream_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            path: "/api/stream".to_string(),
            reconnect_delay_ms: 2000,
            capacity: 256,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            peak_capacity: DEFAULT_CAPACITY,
            raw_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Default for PeaksConfig {
    fn default() -> Self {
        let parameters = ["Temperature", "Humidity", "LDR", "FLEX", "G-Force", "Height"];
        Self {
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_stream_data: false,
        }
    }
}

impl ChartConfig {
    fn new(title: &str, max_points: usize, series: &[(&str, &str)]) -> Self {
        Self {
            title: title.to_string(),
            max_points,
            series: series.iter().map(|(label, key)| Series::new(*label, *key)).collect(),
        }
    }

    /// the three graphs the sensor node feeds
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "Orientation (Roll, Pitch, Yaw)",
                100,
                &[("Roll", "roll"), ("Pitch", "pitch"), ("Yaw", "yaw")],
            ),
            Self::new(
                "Sensor Readings",
                50,
                &[("G-Force", "g"), ("LDR", "ldr"), ("FLEX", "flex")],
            ),
            Self::new(
                "Environmental Data",
                50,
                &[("Temperature", "temp"), ("Humidity", "humidity")],
            ),
        ]
    }
}

impl ViewerConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut config: ViewerConfig = toml::from_str(content).context("Failed to parse config")?;
        if config.charts.is_empty() {
            config.charts = ChartConfig::defaults();
        }
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("viewer.toml"),
            std::path::PathBuf::from("..").join("config").join("viewer.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self {
            charts: ChartConfig::defaults(),
            ..Self::default()
        }
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.server.base_url.trim_end_matches('/'),
            self.stream.path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.stream.reconnect_delay_ms)
    }

    /// Build the rolling chart windows.
    pub fn chart_set(&self) -> ChartSet {
        ChartSet::new(
            self.charts
                .iter()
                .map(|c| RollingChart::new(c.title.clone(), c.series.clone(), c.max_points))
                .collect(),
        )
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          VIEWER CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Server: {}", self.server.base_url);
        println!("│ Stream: {}", self.stream_url());
        println!("│ History: {} peaks / {} raw", self.history.peak_capacity, self.history.raw_capacity);
        println!("│ Charts: {}", self.charts.len());
        println!("│ Dashboard: {}", if self.dashboard.enabled { self.dashboard.bind.as_str() } else { "off" });
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
