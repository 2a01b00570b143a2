pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Which subsystem produced a position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSource {
    Gps,
    Accelerometer,
    Hybrid,
}

/// Coarse tracking status shown to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationStatus {
    Accessed,
    Denied,
    #[default]
    Unknown,
    Error,
}

/// A geographic position. Never mutated after construction; updates build a new value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub source: PositionSource,
}

impl Position {
    pub fn gps(lat: f64, lng: f64, accuracy: f64, timestamp: i64) -> Self {
        Self {
            lat,
            lng,
            accuracy: Some(accuracy),
            timestamp: Some(timestamp),
            source: PositionSource::Gps,
        }
    }

    pub fn accelerometer(lat: f64, lng: f64, accuracy: f64, timestamp: i64) -> Self {
        Self {
            lat,
            lng,
            accuracy: Some(accuracy),
            timestamp: Some(timestamp),
            source: PositionSource::Accelerometer,
        }
    }

    pub fn base(&self) -> BaseLocation {
        BaseLocation {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// Last known anchor that dead-reckoned displacement is applied to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaseLocation {
    pub lat: f64,
    pub lng: f64,
}

/// Accelerometer sample, device frame, gravity included (m/s²).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub timestamp_ms: i64,
}

impl MotionSample {
    pub fn new(ax: f64, ay: f64, az: f64, timestamp_ms: i64) -> Self {
        Self {
            ax,
            ay,
            az,
            timestamp_ms,
        }
    }
}

/// Raw device-orientation reading in degrees. Platforms may omit any axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientationReading {
    /// Rotation around z (compass heading).
    #[serde(default)]
    pub alpha: Option<f64>,
    /// Rotation around x (front-to-back tilt).
    #[serde(default)]
    pub beta: Option<f64>,
    /// Rotation around y (left-to-right tilt).
    #[serde(default)]
    pub gamma: Option<f64>,
    pub timestamp_ms: i64,
}

impl OrientationReading {
    pub fn new(alpha: f64, beta: f64, gamma: f64, timestamp_ms: i64) -> Self {
        Self {
            alpha: Some(alpha),
            beta: Some(beta),
            gamma: Some(gamma),
            timestamp_ms,
        }
    }
}

/// Current device orientation in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    /// [0, 360)
    pub heading: f64,
    /// [-180, 180]
    pub pitch: f64,
    /// [-90, 90]
    pub roll: f64,
}

/// World-frame displacement in metres. `x` is east, `z` is north.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplacementVector {
    pub dx: f64,
    pub dz: f64,
    pub magnitude: f64,
}

impl DisplacementVector {
    pub const ZERO: DisplacementVector = DisplacementVector {
        dx: 0.0,
        dz: 0.0,
        magnitude: 0.0,
    };

    pub fn new(dx: f64, dz: f64) -> Self {
        Self {
            dx,
            dz,
            magnitude: (dx * dx + dz * dz).sqrt(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dz == 0.0 && self.magnitude == 0.0
    }
}

/// Formats a coordinate pair for display, e.g. `43.500000, -80.500000`.
pub fn format_coordinates(lat: f64, lng: f64, precision: usize) -> String {
    format!("{:.*}, {:.*}", precision, lat, precision, lng)
}
