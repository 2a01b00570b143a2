//! Accelerometer dead reckoning.
//!
//! Single-step finite-difference integration: the change in the raw signal
//! between two samples is treated as a velocity proxy and scaled straight into
//! a displacement. There is no bias correction and no zero-velocity update, so
//! the output drifts. That is accepted: GPS re-anchors the base location on
//! every fix and the fusion layer only trusts this path during GPS gaps.

use crate::types::{heading_rotation, DisplacementVector, MotionSample, PlanarVec};

#[derive(Debug)]
pub struct DeadReckoner {
    sensitivity: f64,
    last_sample: Option<MotionSample>,
}

impl DeadReckoner {
    pub fn new(sensitivity: f64) -> Self {
        Self {
            sensitivity,
            last_sample: None,
        }
    }

    /// Consumes the next sample (in arrival order) and returns the world-frame
    /// displacement since the previous one.
    pub fn integrate(&mut self, sample: &MotionSample, heading_deg: f64) -> DisplacementVector {
        let Some(prev) = self.last_sample.as_ref() else {
            self.last_sample = Some(sample.clone());
            return DisplacementVector::ZERO;
        };

        let dt = sample.timestamp_ms.saturating_sub(prev.timestamp_ms) as f64 / 1000.0;
        if dt <= 0.0 {
            return DisplacementVector::ZERO;
        }

        let accel_x = (sample.ax - prev.ax) / dt;
        let accel_z = (sample.az - prev.az) / dt;

        let raw = PlanarVec::new(
            accel_x * self.sensitivity * dt,
            accel_z * self.sensitivity * dt,
        );
        let world = device_to_world(raw, heading_deg);

        self.last_sample = Some(sample.clone());
        DisplacementVector::new(world.x, world.y)
    }

    pub fn reset(&mut self) {
        self.last_sample = None;
    }

    pub fn has_previous(&self) -> bool {
        self.last_sample.is_some()
    }
}

/// worldX = x·cosθ − z·sinθ, worldZ = x·sinθ + z·cosθ
pub fn device_to_world(raw: PlanarVec, heading_deg: f64) -> PlanarVec {
    heading_rotation(heading_deg) * raw
}
