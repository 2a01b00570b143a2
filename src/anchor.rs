//! Local east/north frame around an origin fix, for consumers that place
//! things in metres rather than degrees.

use glam::DVec2;

use crate::types::{BaseLocation, Position};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Equirectangular projection about `origin`. Good to a few centimetres
/// over the distances a single session covers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalFrame {
    origin: BaseLocation,
    cos_lat: f64,
}

impl LocalFrame {
    pub fn new(origin: BaseLocation) -> Self {
        Self {
            origin,
            cos_lat: origin.lat.to_radians().cos(),
        }
    }

    pub fn origin(&self) -> BaseLocation {
        self.origin
    }

    /// x east, y north, metres.
    pub fn to_local(&self, position: &Position) -> DVec2 {
        self.offset_of(position.lat, position.lng)
    }

    pub fn offset_of(&self, lat: f64, lng: f64) -> DVec2 {
        let d_lat = (lat - self.origin.lat).to_radians();
        let d_lng = (lng - self.origin.lng).to_radians();
        DVec2::new(EARTH_RADIUS_M * d_lng * self.cos_lat, EARTH_RADIUS_M * d_lat)
    }

    pub fn from_local(&self, offset: DVec2) -> BaseLocation {
        let d_lat = offset.y / EARTH_RADIUS_M;
        let d_lng = offset.x / (EARTH_RADIUS_M * self.cos_lat);
        BaseLocation {
            lat: self.origin.lat + d_lat.to_degrees(),
            lng: self.origin.lng + d_lng.to_degrees(),
        }
    }
}
