//! Live session: wires the platform sources into a `HybridTracker`.
//!
//! One task owns the tracker and handles one event at a time, so fusion
//! state is never shared. Sources run as their own tasks and only talk to
//! the loop through channels.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::TrackerConfig;
use crate::gps::{request_geolocation_permission, GeolocationApi, GpsSource};
use crate::permission::{MotionPermissionApi, MotionPermissionGate};
use crate::sensors::{MotionSensorApi, SensorSubscription, SimulatedPlatform};
use crate::tracker::HybridTracker;
use crate::types::{MotionSample, OrientationReading};

/// The three platform capabilities a session consumes.
#[derive(Clone)]
pub struct Platform {
    pub geolocation: Arc<dyn GeolocationApi>,
    pub permissions: Arc<dyn MotionPermissionApi>,
    pub sensors: Arc<dyn MotionSensorApi>,
}

impl Platform {
    pub fn simulated(platform: Arc<SimulatedPlatform>) -> Self {
        Self {
            geolocation: platform.clone(),
            permissions: platform.clone(),
            sensors: platform,
        }
    }
}

/// How the dead-reckoning path ended up for this session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionState {
    /// Turned off in configuration.
    Disabled,
    Unsupported,
    Denied,
    /// Permission request errored.
    Failed,
    Active,
}

/// Requests the owner of a running session can make.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    /// Re-issue the one-shot GPS request.
    Refresh,
    /// Re-query the geolocation permission.
    RequestPermission,
    /// Drop every position and the dead-reckoning history.
    Clear,
}

/// Runs until `shutdown` resolves. `on_status` is called with the tracker
/// every `status_interval_ms`.
pub async fn run_session<S, F>(
    tracker: &mut HybridTracker,
    platform: &Platform,
    config: &TrackerConfig,
    shutdown: S,
    on_status: F,
) -> MotionState
where
    S: Future<Output = ()>,
    F: FnMut(&HybridTracker),
{
    let (_commands_tx, commands) = mpsc::channel(1);
    run_session_with_commands(tracker, platform, config, commands, shutdown, on_status).await
}

/// `run_session` that also serves `SessionCommand`s until the sender is dropped.
pub async fn run_session_with_commands<S, F>(
    tracker: &mut HybridTracker,
    platform: &Platform,
    config: &TrackerConfig,
    mut commands: mpsc::Receiver<SessionCommand>,
    shutdown: S,
    mut on_status: F,
) -> MotionState
where
    S: Future<Output = ()>,
    F: FnMut(&HybridTracker),
{
    // Zero-sized channels panic on construction; configs built in code skip validation.
    let gps_capacity = config.gps_channel_capacity.max(1);
    let sensor_capacity = config.sensor_channel_capacity.max(1);
    let (gps_tx, mut gps_rx) = mpsc::channel(gps_capacity);
    let (base_tx, mut base_rx) = broadcast::channel(gps_capacity);
    let (motion_tx, mut motion_rx) = mpsc::channel(sensor_capacity);
    let (orientation_tx, mut orientation_rx) = mpsc::channel(sensor_capacity);

    let geolocation = platform.geolocation.as_ref();
    if geolocation.is_supported() && geolocation.is_secure_context() {
        refresh_permission(tracker, geolocation).await;
    }

    let mut gps = GpsSource::start(platform.geolocation.clone(), config, gps_tx, base_tx);

    let (motion_state, subscription) =
        enable_motion(tracker, platform, config, motion_tx, orientation_tx).await;

    let mut status = interval(Duration::from_millis(config.status_interval_ms.max(1)));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut gps_open = true;
    let mut base_open = true;
    let mut motion_open = subscription.is_some();
    let mut orientation_open = subscription.is_some();
    let mut commands_open = true;

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("[fusion] shutdown requested");
                break;
            }
            event = gps_rx.recv(), if gps_open => match event {
                Some(event) => tracker.handle_gps(event),
                None => gps_open = false,
            },
            base = base_rx.recv(), if base_open => match base {
                Ok(base) => tracker.rebase(base),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[fusion] base location receiver lagged by {}", skipped);
                }
                Err(RecvError::Closed) => base_open = false,
            },
            sample = motion_rx.recv(), if motion_open => match sample {
                Some(sample) => {
                    tracker.feed_motion(&sample);
                }
                None => motion_open = false,
            },
            reading = orientation_rx.recv(), if orientation_open => match reading {
                Some(reading) => tracker.feed_orientation(&reading),
                None => orientation_open = false,
            },
            command = commands.recv(), if commands_open => match command {
                Some(SessionCommand::Refresh) => {
                    if !gps.refresh() {
                        log::warn!("[gps] refresh ignored, GPS source is not running");
                    }
                }
                Some(SessionCommand::RequestPermission) => {
                    refresh_permission(tracker, geolocation).await;
                }
                Some(SessionCommand::Clear) => {
                    log::info!("[fusion] location cleared");
                    tracker.clear();
                }
                None => commands_open = false,
            },
            _ = status.tick() => on_status(tracker),
        }
    }

    drop(subscription);
    drop(gps);
    tracker.set_motion_enabled(false);
    motion_state
}

async fn refresh_permission(tracker: &mut HybridTracker, api: &dyn GeolocationApi) {
    let state = request_geolocation_permission(api).await;
    tracker.set_geolocation_permission(state);
}

async fn enable_motion(
    tracker: &mut HybridTracker,
    platform: &Platform,
    config: &TrackerConfig,
    motion_tx: mpsc::Sender<MotionSample>,
    orientation_tx: mpsc::Sender<OrientationReading>,
) -> (MotionState, Option<SensorSubscription>) {
    if !config.enable_motion {
        return (MotionState::Disabled, None);
    }
    if !platform.sensors.is_supported() {
        log::warn!("[motion] motion sensors not supported, dead reckoning off");
        return (MotionState::Unsupported, None);
    }

    let mut gate = MotionPermissionGate::new();
    match gate.negotiate(platform.permissions.as_ref()).await {
        Ok(outcome) if outcome.is_granted() => {
            let subscription = platform.sensors.subscribe(motion_tx, orientation_tx);
            tracker.set_motion_enabled(true);
            log::info!("[motion] dead reckoning enabled");
            (MotionState::Active, Some(subscription))
        }
        Ok(outcome) => {
            log::error!("[motion] permission not granted: {:?}", outcome);
            (MotionState::Denied, None)
        }
        Err(err) => {
            log::error!("[motion] permission request failed: {}", err);
            (MotionState::Failed, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::LocationError;
    use crate::permission::PermissionState;
    use crate::sensors::SimulationConfig;
    use crate::types::{LocationStatus, PositionSource};

    fn fast_simulation() -> SimulationConfig {
        SimulationConfig {
            gps_interval_ms: 50,
            initial_fix_delay_ms: 5,
            motion_interval_ms: 5,
            orientation_interval_ms: 5,
            ..Default::default()
        }
    }

    async fn run_with_commands(
        sim: SimulationConfig,
        config: TrackerConfig,
        millis: u64,
        script: Vec<(u64, SessionCommand)>,
    ) -> HybridTracker {
        let clock = Arc::new(SystemClock);
        let platform = Platform::simulated(Arc::new(SimulatedPlatform::new(sim, clock.clone())));
        let mut tracker = HybridTracker::new(&config, clock);
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for (at, command) in script {
                tokio::time::sleep(Duration::from_millis(at)).await;
                let _ = tx.send(command).await;
            }
        });

        run_session_with_commands(
            &mut tracker,
            &platform,
            &config,
            rx,
            tokio::time::sleep(Duration::from_millis(millis)),
            |_| {},
        )
        .await;
        tracker
    }

    async fn run_for(sim: SimulationConfig, millis: u64) -> (HybridTracker, MotionState, usize) {
        let config = TrackerConfig {
            status_interval_ms: 50,
            ..Default::default()
        };
        let clock = Arc::new(SystemClock);
        let platform = Platform::simulated(Arc::new(SimulatedPlatform::new(sim, clock.clone())));
        let mut tracker = HybridTracker::new(&config, clock);
        let mut ticks = 0;

        let motion = run_session(
            &mut tracker,
            &platform,
            &config,
            tokio::time::sleep(Duration::from_millis(millis)),
            |_| ticks += 1,
        )
        .await;
        (tracker, motion, ticks)
    }

    #[tokio::test]
    async fn test_session_fuses_gps_and_motion() {
        let (tracker, motion, ticks) = run_for(fast_simulation(), 300).await;

        assert_eq!(motion, MotionState::Active);
        let state = tracker.state();
        assert_eq!(state.status, LocationStatus::Accessed);
        assert_eq!(state.position.as_ref().unwrap().source, PositionSource::Gps);
        assert!(tracker.stats().gps_fixes >= 2);
        assert!(tracker.stats().motion_samples > 0);
        assert!(tracker.base().is_some());
        assert!(ticks >= 1);
        assert!(!tracker.motion_enabled());
    }

    #[tokio::test]
    async fn test_denied_motion_leaves_gps_only() {
        let sim = SimulationConfig {
            motion_permission: Some(PermissionState::Denied),
            ..fast_simulation()
        };
        let (tracker, motion, _) = run_for(sim, 150).await;

        assert_eq!(motion, MotionState::Denied);
        assert_eq!(tracker.stats().motion_samples, 0);
        assert!(tracker.state().accelerometer_position.is_none());
        assert_eq!(tracker.state().status, LocationStatus::Accessed);
    }

    #[tokio::test]
    async fn test_missing_permission_api_enables_motion() {
        let sim = SimulationConfig {
            motion_permission: None,
            ..fast_simulation()
        };
        let (_, motion, _) = run_for(sim, 50).await;
        assert_eq!(motion, MotionState::Active);
    }

    #[tokio::test]
    async fn test_unsupported_sensors() {
        let sim = SimulationConfig {
            motion_supported: false,
            ..fast_simulation()
        };
        let (_, motion, _) = run_for(sim, 50).await;
        assert_eq!(motion, MotionState::Unsupported);
    }

    #[tokio::test]
    async fn test_denied_geolocation_reports_error() {
        let sim = SimulationConfig {
            deny_geolocation: true,
            ..fast_simulation()
        };
        let (tracker, _, _) = run_for(sim, 100).await;

        assert_eq!(tracker.state().status, LocationStatus::Error);
        assert_eq!(tracker.last_gps_error(), Some(&LocationError::PermissionDenied));
        assert!(tracker.state().gps_position.is_none());
    }

    #[tokio::test]
    async fn test_geolocation_permission_recorded() {
        let (tracker, _, _) = run_for(fast_simulation(), 50).await;
        assert_eq!(tracker.geolocation_permission(), Some(PermissionState::Granted));

        let sim = SimulationConfig {
            deny_geolocation: true,
            ..fast_simulation()
        };
        let (tracker, _, _) = run_for(sim, 50).await;
        assert_eq!(tracker.geolocation_permission(), Some(PermissionState::Denied));
    }

    #[tokio::test]
    async fn test_zero_capacity_config_runs() {
        let config = TrackerConfig {
            gps_channel_capacity: 0,
            sensor_channel_capacity: 0,
            ..Default::default()
        };
        let tracker = run_with_commands(fast_simulation(), config, 100, Vec::new()).await;
        assert!(tracker.stats().gps_fixes >= 1);
    }

    #[tokio::test]
    async fn test_refresh_command_requests_new_fix() {
        // Slow watch: one fix on its first tick, then nothing for the session.
        let sim = SimulationConfig {
            gps_interval_ms: 60_000,
            ..fast_simulation()
        };
        let config = TrackerConfig {
            enable_motion: false,
            ..Default::default()
        };
        let script = vec![
            (50, SessionCommand::Refresh),
            (10, SessionCommand::RequestPermission),
        ];
        let tracker = run_with_commands(sim, config, 200, script).await;

        // Initial one-shot, first watch tick, refresh.
        assert_eq!(tracker.stats().gps_fixes, 3);
        assert_eq!(tracker.geolocation_permission(), Some(PermissionState::Granted));
    }

    #[tokio::test]
    async fn test_clear_command_resets_location() {
        let sim = SimulationConfig {
            gps_interval_ms: 60_000,
            ..fast_simulation()
        };
        let config = TrackerConfig {
            enable_motion: false,
            ..Default::default()
        };
        let tracker = run_with_commands(sim, config, 150, vec![(80, SessionCommand::Clear)]).await;

        assert_eq!(tracker.state().status, LocationStatus::Unknown);
        assert!(tracker.state().position.is_none());
        assert_eq!(tracker.stats().gps_fixes, 2);
    }
}
