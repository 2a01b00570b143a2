//! Synchronous composition of the location pipeline.
//!
//! orientation ─┐
//!              ├─> dead reckoning ─> accumulator ─> SET_ACCELEROMETER_LOCATION ─┐
//! motion ──────┘                          ^                                     ├─> LocationStore
//! gps ──────────── SET_GPS_LOCATION ──────┼─────────────────────────────────────┘
//!                  base broadcast ────────┘
//!
//! Every method runs to completion; callers deliver events one at a time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accumulator::{DisplacementAccumulator, FlushOutcome};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::dead_reckoning::DeadReckoner;
use crate::error::LocationError;
use crate::gps::GpsEvent;
use crate::orientation::OrientationIntegrator;
use crate::permission::PermissionState;
use crate::sensor_fusion::{FusionEvent, FusionState, LocationStore, SubscriptionId};
use crate::types::{BaseLocation, LocationStatus, MotionSample, OrientationReading, OrientationSample, Position};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub gps_fixes: u64,
    pub gps_errors: u64,
    pub motion_samples: u64,
    pub orientation_samples: u64,
    pub flushes: u64,
    pub discarded_flushes: u64,
}

pub struct HybridTracker {
    store: LocationStore,
    orientation: OrientationIntegrator,
    reckoner: DeadReckoner,
    accumulator: DisplacementAccumulator,
    motion_enabled: bool,
    geolocation_permission: Option<PermissionState>,
    last_gps_error: Option<LocationError>,
    stats: TrackerStats,
}

impl HybridTracker {
    /// Dead reckoning starts disabled; it is switched on once motion
    /// permission has been granted.
    pub fn new(config: &TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: LocationStore::new(clock, config.gps_freshness_ms),
            orientation: OrientationIntegrator::new(),
            reckoner: DeadReckoner::new(config.sensitivity),
            accumulator: DisplacementAccumulator::new(config),
            motion_enabled: false,
            geolocation_permission: None,
            last_gps_error: None,
            stats: TrackerStats::default(),
        }
    }

    pub fn dispatch(&mut self, event: FusionEvent) -> &FusionState {
        self.store.dispatch(event)
    }

    pub fn handle_gps(&mut self, event: GpsEvent) {
        match event {
            GpsEvent::Started => {
                self.store.dispatch(FusionEvent::SetStatus(LocationStatus::Unknown));
            }
            GpsEvent::Fix(fix) => {
                self.stats.gps_fixes += 1;
                self.last_gps_error = None;
                self.geolocation_permission = Some(PermissionState::Granted);
                self.store.dispatch(FusionEvent::SetGpsLocation(fix));
            }
            GpsEvent::Failed(err) => {
                self.stats.gps_errors += 1;
                if err == LocationError::PermissionDenied {
                    self.geolocation_permission = Some(PermissionState::Denied);
                }
                self.last_gps_error = Some(err);
                self.store.dispatch(FusionEvent::SetStatus(LocationStatus::Error));
            }
        }
    }

    /// New dead-reckoning anchor, delivered through the base-location broadcast.
    pub fn rebase(&mut self, base: BaseLocation) {
        self.accumulator.set_base(base);
    }

    pub fn feed_orientation(&mut self, reading: &OrientationReading) {
        if !self.motion_enabled {
            return;
        }
        self.stats.orientation_samples += 1;
        self.orientation.update(reading);
    }

    /// Integrates one accelerometer sample. Returns the dead-reckoned position
    /// when this sample triggered a flush against a known base.
    pub fn feed_motion(&mut self, sample: &MotionSample) -> Option<Position> {
        if !self.motion_enabled {
            return None;
        }
        self.stats.motion_samples += 1;

        let step = self.reckoner.integrate(sample, self.orientation.heading_deg());
        match self.accumulator.add(step, sample.timestamp_ms) {
            FlushOutcome::Pending => None,
            FlushOutcome::Emitted(pos) => {
                self.stats.flushes += 1;
                self.store
                    .dispatch(FusionEvent::SetAccelerometerLocation(pos.clone()));
                Some(pos)
            }
            FlushOutcome::Discarded => {
                self.stats.discarded_flushes += 1;
                log::debug!("[motion] flush without base location, displacement dropped");
                None
            }
        }
    }

    /// Turning motion off drops integration history so a later re-enable
    /// starts from a fresh sample.
    pub fn set_motion_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.reckoner.reset();
            self.accumulator.reset();
            self.orientation.reset();
        }
        self.motion_enabled = enabled;
    }

    pub fn motion_enabled(&self) -> bool {
        self.motion_enabled
    }

    /// Last known geolocation permission; `None` until queried or implied by a GPS result.
    pub fn geolocation_permission(&self) -> Option<PermissionState> {
        self.geolocation_permission
    }

    pub fn set_geolocation_permission(&mut self, state: PermissionState) {
        if self.geolocation_permission != Some(state) {
            log::info!("[gps] geolocation permission {:?}", state);
        }
        self.geolocation_permission = Some(state);
    }

    pub fn clear(&mut self) {
        self.store.dispatch(FusionEvent::Clear);
        self.reckoner.reset();
        self.accumulator.reset();
        self.last_gps_error = None;
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&FusionState) + Send + 'static,
    {
        self.store.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    pub fn state(&self) -> &FusionState {
        self.store.state()
    }

    pub fn now_ms(&self) -> i64 {
        self.store.now_ms()
    }

    pub fn orientation(&self) -> OrientationSample {
        self.orientation.orientation()
    }

    pub fn base(&self) -> Option<BaseLocation> {
        self.accumulator.base()
    }

    pub fn last_gps_error(&self) -> Option<&LocationError> {
        self.last_gps_error.as_ref()
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }
}
