//! Device orientation from gyroscope/orientation readings.
//!
//! Heading is the raw z-axis rotation, pitch the x tilt, roll the y tilt.
//! No smoothing and no unwrapping across 0/360.

use crate::types::{OrientationReading, OrientationSample};

#[derive(Debug, Default)]
pub struct OrientationIntegrator {
    current: OrientationSample,
    last_reading: Option<OrientationReading>,
}

impl OrientationIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a reading. Returns true when the orientation was updated.
    ///
    /// The first reading only primes the timestamp; readings whose timestamp
    /// does not advance are dropped without touching state.
    pub fn update(&mut self, reading: &OrientationReading) -> bool {
        let Some(prev) = self.last_reading.as_ref() else {
            self.last_reading = Some(reading.clone());
            return false;
        };

        let dt = reading.timestamp_ms.saturating_sub(prev.timestamp_ms) as f64 / 1000.0;
        if dt <= 0.0 {
            return false;
        }

        self.current = OrientationSample {
            heading: reading.alpha.unwrap_or(0.0),
            pitch: reading.beta.unwrap_or(0.0),
            roll: reading.gamma.unwrap_or(0.0),
        };
        self.last_reading = Some(reading.clone());
        true
    }

    pub fn orientation(&self) -> OrientationSample {
        self.current
    }

    pub fn heading_deg(&self) -> f64 {
        self.current.heading
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
