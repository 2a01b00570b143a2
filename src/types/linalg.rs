//! Linear algebra aliases for the dead-reckoning path.
//!
//! Device-relative displacement lives in the horizontal (x, z) plane and is
//! rotated into the world frame by the current heading.

use nalgebra::{Rotation2, Vector2};

/// Horizontal displacement, `x` east / `z` north once in the world frame.
pub type PlanarVec = Vector2<f64>;

/// Rotation about the vertical axis by the device heading.
pub type HeadingRotation = Rotation2<f64>;

/// Builds the device → world rotation for a heading given in degrees.
pub fn heading_rotation(heading_deg: f64) -> HeadingRotation {
    HeadingRotation::new(heading_deg.to_radians())
}
