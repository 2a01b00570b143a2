//! Batches dead-reckoned displacement into committed position updates.
//!
//! `dx`/`dz` are summed component-wise. The running `magnitude` is the sum of
//! step magnitudes (distance travelled, not net displacement), which is what
//! the flush threshold is compared against.

use crate::config::TrackerConfig;
use crate::types::{BaseLocation, DisplacementVector, Position};

/// Result of feeding one displacement.
#[derive(Clone, Debug, PartialEq)]
pub enum FlushOutcome {
    /// Neither threshold met; displacement kept.
    Pending,
    /// Flushed against the base location.
    Emitted(Position),
    /// Flush triggered with no base location; displacement dropped.
    Discarded,
}

#[derive(Debug)]
pub struct DisplacementAccumulator {
    accumulated: DisplacementVector,
    base: Option<BaseLocation>,
    last_flush_ms: Option<i64>,
    magnitude_threshold: f64,
    flush_interval_ms: i64,
    meters_per_degree: f64,
    accuracy_m: f64,
}

impl DisplacementAccumulator {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            accumulated: DisplacementVector::ZERO,
            base: None,
            last_flush_ms: None,
            magnitude_threshold: config.flush_magnitude_threshold,
            flush_interval_ms: config.flush_interval_ms,
            meters_per_degree: config.meters_per_degree,
            accuracy_m: config.accelerometer_accuracy_m,
        }
    }

    /// Re-anchors dead reckoning on a new base (normally a fresh GPS fix).
    pub fn set_base(&mut self, base: BaseLocation) {
        self.base = Some(base);
    }

    pub fn base(&self) -> Option<BaseLocation> {
        self.base
    }

    pub fn accumulated(&self) -> DisplacementVector {
        self.accumulated
    }

    /// Adds a displacement and flushes when the distance threshold is crossed
    /// or the flush interval has elapsed since the last flush.
    pub fn add(&mut self, step: DisplacementVector, now_ms: i64) -> FlushOutcome {
        self.accumulated.dx += step.dx;
        self.accumulated.dz += step.dz;
        self.accumulated.magnitude += step.magnitude;

        let last_flush = *self.last_flush_ms.get_or_insert(now_ms);
        let distance_due = self.accumulated.magnitude > self.magnitude_threshold;
        let interval_due = now_ms.saturating_sub(last_flush) >= self.flush_interval_ms;

        if distance_due || interval_due {
            self.flush(now_ms)
        } else {
            FlushOutcome::Pending
        }
    }

    fn flush(&mut self, now_ms: i64) -> FlushOutcome {
        let moved = std::mem::replace(&mut self.accumulated, DisplacementVector::ZERO);
        self.last_flush_ms = Some(now_ms);

        let Some(base) = self.base else {
            return FlushOutcome::Discarded;
        };

        let (lat, lng) = offset_lat_lng(base, moved, self.meters_per_degree);
        self.base = Some(BaseLocation { lat, lng });
        FlushOutcome::Emitted(Position::accelerometer(lat, lng, self.accuracy_m, now_ms))
    }

    pub fn reset(&mut self) {
        self.accumulated = DisplacementVector::ZERO;
        self.last_flush_ms = None;
    }
}

/// Flat-earth conversion of east/north metres into a lat/lng offset.
pub fn offset_lat_lng(base: BaseLocation, moved: DisplacementVector, meters_per_degree: f64) -> (f64, f64) {
    let lat_change = moved.dz / meters_per_degree;
    let lng_change = moved.dx / (meters_per_degree * base.lat.to_radians().cos());
    (base.lat + lat_change, base.lng + lng_change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSource;
    use approx::assert_abs_diff_eq;

    fn accumulator() -> DisplacementAccumulator {
        DisplacementAccumulator::new(&TrackerConfig::default())
    }

    #[test]
    fn test_small_steps_stay_pending() {
        let mut acc = accumulator();
        acc.set_base(BaseLocation { lat: 43.5, lng: -80.5 });
        assert_eq!(acc.add(DisplacementVector::new(0.03, 0.0), 1000), FlushOutcome::Pending);
        assert_eq!(acc.add(DisplacementVector::new(0.03, 0.0), 1020), FlushOutcome::Pending);
        assert_abs_diff_eq!(acc.accumulated().dx, 0.06, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_flush_converts_and_resets() {
        let mut acc = accumulator();
        acc.set_base(BaseLocation { lat: 0.0, lng: 10.0 });

        acc.add(DisplacementVector::new(0.0, 0.06), 1000);
        let outcome = acc.add(DisplacementVector::new(0.0, 0.06), 1020);
        let FlushOutcome::Emitted(pos) = outcome else {
            panic!("expected flush, got {:?}", outcome);
        };

        assert_eq!(pos.source, PositionSource::Accelerometer);
        assert_eq!(pos.accuracy, Some(10.0));
        assert_eq!(pos.timestamp, Some(1020));
        assert_abs_diff_eq!(pos.lat, 0.12 / 111_000.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pos.lng, 10.0, epsilon = 1e-12);

        assert_eq!(acc.accumulated().magnitude, 0.0);
        assert_eq!(acc.accumulated(), DisplacementVector::ZERO);
        // Base follows the emitted position.
        assert_eq!(acc.base(), Some(pos.base()));

        // Small steps after the flush do not re-trigger it.
        assert_eq!(acc.add(DisplacementVector::new(0.0, 0.05), 1040), FlushOutcome::Pending);
    }

    #[test]
    fn test_longitude_corrected_for_latitude() {
        let base = BaseLocation { lat: 60.0, lng: 0.0 };
        let (lat, lng) = offset_lat_lng(base, DisplacementVector::new(111.0, 0.0), 111_000.0);
        assert_abs_diff_eq!(lat, 60.0, epsilon = 1e-12);
        // cos(60°) = 0.5 doubles the longitude change.
        assert_abs_diff_eq!(lng, 0.002, epsilon = 1e-9);
    }

    #[test]
    fn test_interval_flush() {
        let mut acc = accumulator();
        acc.set_base(BaseLocation { lat: 43.5, lng: -80.5 });
        assert_eq!(acc.add(DisplacementVector::new(0.01, 0.0), 1000), FlushOutcome::Pending);
        assert_eq!(acc.add(DisplacementVector::new(0.01, 0.0), 1499), FlushOutcome::Pending);
        assert!(matches!(
            acc.add(DisplacementVector::new(0.01, 0.0), 1500),
            FlushOutcome::Emitted(_)
        ));
        assert_eq!(acc.add(DisplacementVector::new(0.01, 0.0), 1600), FlushOutcome::Pending);
    }

    #[test]
    fn test_interval_saturates_on_extreme_timestamps() {
        let mut acc = accumulator();
        acc.set_base(BaseLocation { lat: 43.5, lng: -80.5 });
        assert_eq!(acc.add(DisplacementVector::new(0.01, 0.0), i64::MIN), FlushOutcome::Pending);
        assert!(matches!(
            acc.add(DisplacementVector::new(0.01, 0.0), i64::MAX),
            FlushOutcome::Emitted(_)
        ));
        // Clock jumping backwards never counts as elapsed time.
        assert_eq!(acc.add(DisplacementVector::new(0.01, 0.0), i64::MIN), FlushOutcome::Pending);
    }

    #[test]
    fn test_flush_without_base_discards() {
        let mut acc = accumulator();
        assert_eq!(acc.add(DisplacementVector::new(0.2, 0.0), 1000), FlushOutcome::Discarded);
        assert_eq!(acc.accumulated(), DisplacementVector::ZERO);

        // Base arriving later does not resurrect the dropped displacement.
        acc.set_base(BaseLocation { lat: 1.0, lng: 1.0 });
        let FlushOutcome::Emitted(pos) = acc.add(DisplacementVector::new(0.0, 0.0), 1500) else {
            panic!("expected interval flush");
        };
        assert_eq!((pos.lat, pos.lng), (1.0, 1.0));
    }
}
