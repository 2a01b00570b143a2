use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::clock::Clock;
use crate::error::LocationError;
use crate::gps::{FixResult, GeolocationApi, PositionOptions, WatchId};
use crate::permission::{MotionPermissionApi, PermissionRequest, PermissionState};
use crate::types::{BaseLocation, MotionSample, OrientationReading, Position};

/// Platform motion and orientation sensors.
pub trait MotionSensorApi: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }

    /// Starts streaming samples until the returned guard is dropped.
    fn subscribe(
        &self,
        motion: Sender<MotionSample>,
        orientation: Sender<OrientationReading>,
    ) -> SensorSubscription;
}

/// Owns the sensor listeners; dropping it removes them.
#[derive(Debug, Default)]
pub struct SensorSubscription {
    tasks: Vec<JoinHandle<()>>,
}

impl SensorSubscription {
    pub fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    pub fn is_active(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Polls `next` every `period` and forwards into `tx`. Samples are dropped
/// while the channel is full; the loop ends when the receiver goes away.
pub async fn pump<T, F>(label: &'static str, period: Duration, tx: Sender<T>, mut next: F)
where
    F: FnMut() -> T,
{
    let mut interval = interval(period);
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        match tx.try_send(next()) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 500 == 0 {
                    log::debug!("[{}] {} samples", label, sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("[{}] channel closed after {} samples", label, sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {}
        }
    }
}

// ─── Simulated platform ──────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub origin: BaseLocation,
    pub gps_interval_ms: u64,
    /// Per-fix drift applied to both coordinates.
    pub gps_drift_deg: f64,
    pub gps_accuracy_m: f64,
    pub initial_fix_delay_ms: u64,
    /// Window (offset from start, length) during which the watch goes quiet.
    pub gps_gap: Option<(i64, i64)>,
    pub deny_geolocation: bool,
    pub geolocation_supported: bool,
    /// False simulates a platform without a geolocation permission query.
    pub geolocation_permission_api: bool,
    pub motion_supported: bool,
    /// `None` simulates a platform without a permission request API.
    pub motion_permission: Option<PermissionState>,
    pub motion_interval_ms: u64,
    pub orientation_interval_ms: u64,
    pub heading_rate_deg_s: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            origin: BaseLocation {
                lat: 37.7749,
                lng: -122.4194,
            },
            gps_interval_ms: 1000,
            gps_drift_deg: 0.00001,
            gps_accuracy_m: 5.0,
            initial_fix_delay_ms: 50,
            gps_gap: None,
            deny_geolocation: false,
            geolocation_supported: true,
            geolocation_permission_api: true,
            motion_supported: true,
            motion_permission: Some(PermissionState::Granted),
            motion_interval_ms: 20,
            orientation_interval_ms: 20,
            heading_rate_deg_s: 10.0,
        }
    }
}

/// Deterministic stand-in for the device: drifting GPS, a sinusoidal
/// accelerometer and a slowly rotating heading.
pub struct SimulatedPlatform {
    config: SimulationConfig,
    clock: Arc<dyn Clock>,
    started_ms: i64,
    next_watch: AtomicU64,
    watches: Mutex<HashMap<WatchId, JoinHandle<()>>>,
}

impl SimulatedPlatform {
    pub fn new(config: SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        let started_ms = clock.now_ms();
        Self {
            config,
            clock,
            started_ms,
            next_watch: AtomicU64::new(1),
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_watches(&self) -> usize {
        self.watches.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn in_gap(config: &SimulationConfig, elapsed_ms: i64) -> bool {
        config
            .gps_gap
            .map_or(false, |(start, len)| elapsed_ms >= start && elapsed_ms < start.saturating_add(len))
    }

    fn fix(config: &SimulationConfig, seq: u64, now_ms: i64) -> Position {
        let seq = seq as f64;
        Position::gps(
            config.origin.lat + seq * config.gps_drift_deg,
            config.origin.lng + seq * config.gps_drift_deg,
            config.gps_accuracy_m + (seq * 0.1).sin() * 2.0,
            now_ms,
        )
    }

    fn accel_sample(clock: &dyn Clock, started_ms: i64) -> MotionSample {
        let now = clock.now_ms();
        let t = now.saturating_sub(started_ms) as f64 / 1000.0;
        MotionSample::new(
            (t * 2.0 * PI).sin() * 0.5,
            (t * 2.0 * PI).cos() * 0.3,
            9.81 + (t * PI).sin() * 0.1,
            now,
        )
    }

    fn orientation_reading(clock: &dyn Clock, started_ms: i64, rate_deg_s: f64) -> OrientationReading {
        let now = clock.now_ms();
        let t = now.saturating_sub(started_ms) as f64 / 1000.0;
        OrientationReading::new(
            (rate_deg_s * t).rem_euclid(360.0),
            (t * 0.5).sin() * 5.0,
            (t * 0.3).cos() * 3.0,
            now,
        )
    }
}

impl GeolocationApi for SimulatedPlatform {
    fn is_supported(&self) -> bool {
        self.config.geolocation_supported
    }

    fn current_position(&self, _options: PositionOptions) -> BoxFuture<'static, FixResult> {
        let config = self.config.clone();
        let clock = self.clock.clone();
        let started_ms = self.started_ms;
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(config.initial_fix_delay_ms)).await;
            let now = clock.now_ms();
            if config.deny_geolocation {
                Err(LocationError::PermissionDenied)
            } else if Self::in_gap(&config, now.saturating_sub(started_ms)) {
                Err(LocationError::PositionUnavailable)
            } else {
                Ok(Self::fix(&config, 0, now))
            }
        })
    }

    fn watch_position(&self, _options: PositionOptions, sink: Sender<FixResult>) -> WatchId {
        let id = WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed));
        let config = self.config.clone();
        let clock = self.clock.clone();
        let started_ms = self.started_ms;

        let task = tokio::spawn(async move {
            if config.deny_geolocation {
                let _ = sink.send(Err(LocationError::PermissionDenied)).await;
                return;
            }
            let mut seq = 0u64;
            pump("gps", Duration::from_millis(config.gps_interval_ms), sink, move || {
                let now = clock.now_ms();
                seq += 1;
                if Self::in_gap(&config, now.saturating_sub(started_ms)) {
                    // Nothing arrives during a gap; report it as a timeout.
                    Err(LocationError::Timeout)
                } else {
                    Ok(Self::fix(&config, seq, now))
                }
            })
            .await;
        });

        if let Ok(mut watches) = self.watches.lock() {
            watches.insert(id, task);
        }
        id
    }

    fn clear_watch(&self, id: WatchId) {
        if let Ok(mut watches) = self.watches.lock() {
            if let Some(task) = watches.remove(&id) {
                task.abort();
            }
        }
    }

    fn query_permission(&self) -> Option<PermissionRequest> {
        if !self.config.geolocation_permission_api {
            return None;
        }
        let state = if self.config.deny_geolocation {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        };
        Some(Box::pin(async move { Ok(state) }))
    }
}

impl MotionPermissionApi for SimulatedPlatform {
    fn request_motion_permission(&self) -> Option<PermissionRequest> {
        self.config
            .motion_permission
            .map(|state| -> PermissionRequest { Box::pin(async move { Ok(state) }) })
    }

    fn request_orientation_permission(&self) -> Option<PermissionRequest> {
        self.request_motion_permission()
    }
}

impl MotionSensorApi for SimulatedPlatform {
    fn is_supported(&self) -> bool {
        self.config.motion_supported
    }

    fn subscribe(
        &self,
        motion: Sender<MotionSample>,
        orientation: Sender<OrientationReading>,
    ) -> SensorSubscription {
        let started_ms = self.started_ms;

        let clock = self.clock.clone();
        let motion_task = tokio::spawn(pump(
            "motion",
            Duration::from_millis(self.config.motion_interval_ms),
            motion,
            move || Self::accel_sample(clock.as_ref(), started_ms),
        ));

        let clock = self.clock.clone();
        let rate = self.config.heading_rate_deg_s;
        let orientation_task = tokio::spawn(pump(
            "orientation",
            Duration::from_millis(self.config.orientation_interval_ms),
            orientation,
            move || Self::orientation_reading(clock.as_ref(), started_ms, rate),
        ));

        SensorSubscription::new(vec![motion_task, orientation_task])
    }
}

impl Drop for SimulatedPlatform {
    fn drop(&mut self) {
        if let Ok(mut watches) = self.watches.lock() {
            for (_, task) in watches.drain() {
                task.abort();
            }
        }
    }
}
