//! Process configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a sampleflow instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Parse a configuration from a JSON document. Missing fields fall back
    /// to their defaults.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}

/// Logging section. The embedding binary is expected to initialize its own
/// subscriber with this level; the library itself only emits `log` records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Per-engine pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Lookahead depth of the reassembly window, in packets: how far past a
    /// missing packet the stream may advance before the gap is abandoned.
    pub max_late: u16,

    /// Capacity of the bounded queue between the ingest and dispatch loops.
    /// When dispatch falls behind, ingest blocks here and stops consuming
    /// packets; this is the intended backpressure path.
    pub queue_capacity: usize,

    /// Interval of the hub's aggregate stats report, in seconds.
    pub stats_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_late: 100,
            queue_capacity: 100,
            stats_interval_secs: 5,
        }
    }
}
