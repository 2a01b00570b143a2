use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // ── Fusion ──
    /// GPS fixes younger than this keep precedence over dead reckoning.
    pub gps_freshness_ms: i64,

    // ── Dead reckoning ──
    pub sensitivity: f64,

    // ── Displacement accumulator ──
    pub flush_magnitude_threshold: f64,
    pub flush_interval_ms: i64,
    pub meters_per_degree: f64,
    pub accelerometer_accuracy_m: f64,

    // ── GPS source ──
    pub enable_high_accuracy: bool,
    pub gps_timeout_ms: u64,
    pub initial_maximum_age_ms: u64,
    pub watch_maximum_age_ms: u64,

    // ── Session ──
    pub status_interval_ms: u64,
    pub sensor_channel_capacity: usize,
    pub gps_channel_capacity: usize,

    // ── Feature flags ──
    pub enable_motion: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            gps_freshness_ms: 5000,
            sensitivity: 0.01,
            flush_magnitude_threshold: 0.1,
            flush_interval_ms: 500,
            meters_per_degree: 111_000.0,
            accelerometer_accuracy_m: 10.0,
            enable_high_accuracy: true,
            gps_timeout_ms: 10_000,
            initial_maximum_age_ms: 0,
            watch_maximum_age_ms: 1000,
            status_interval_ms: 2000,
            sensor_channel_capacity: 500,
            gps_channel_capacity: 100,
            enable_motion: true,
        }
    }
}

impl TrackerConfig {
    /// Loads a JSON config; missing fields fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("gps_channel_capacity", self.gps_channel_capacity as i64),
            ("sensor_channel_capacity", self.sensor_channel_capacity as i64),
            ("flush_interval_ms", self.flush_interval_ms),
            ("status_interval_ms", self.status_interval_ms as i64),
            ("gps_timeout_ms", self.gps_timeout_ms as i64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value <= 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
        }
        if !(self.meters_per_degree > 0.0) {
            return Err(ConfigError::Invalid("meters_per_degree must be positive".into()));
        }
        Ok(())
    }
}
