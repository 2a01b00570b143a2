use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::anchor::LocalFrame;
use crate::permission::PermissionState;
use crate::tracker::HybridTracker;
use crate::types::{format_coordinates, LocationStatus, PositionSource};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub status: LocationStatus,
    // Fused position
    pub position_source: Option<PositionSource>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub coordinates: Option<String>,
    pub last_update_time: i64,
    // Per-source
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub gps_timestamp: Option<i64>,
    pub accel_lat: Option<f64>,
    pub accel_lng: Option<f64>,
    pub source_divergence_m: Option<f64>,
    pub active_sources: Vec<String>,
    // Local frame offset from the session origin, metres
    pub east_m: Option<f64>,
    pub north_m: Option<f64>,
    // Orientation
    pub heading_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
    // Counters
    pub gps_fixes: u64,
    pub gps_errors: u64,
    pub last_gps_error: Option<String>,
    pub geolocation_permission: Option<PermissionState>,
    pub motion_enabled: bool,
    pub motion_samples: u64,
    pub orientation_samples: u64,
    pub flushes: u64,
    pub discarded_flushes: u64,
}

impl LiveStatus {
    pub fn from_tracker(tracker: &HybridTracker, frame: Option<&LocalFrame>, uptime_seconds: u64) -> Self {
        let state = tracker.state();
        let stats = tracker.stats();
        let orientation = tracker.orientation();
        let position = state.position.as_ref();
        let local = match (frame, position) {
            (Some(frame), Some(pos)) => Some(frame.to_local(pos)),
            _ => None,
        };

        Self {
            timestamp: current_timestamp(),
            uptime_seconds,
            status: state.status,
            position_source: position.map(|p| p.source),
            lat: position.map(|p| p.lat),
            lng: position.map(|p| p.lng),
            accuracy_m: position.and_then(|p| p.accuracy),
            coordinates: position.map(|p| format_coordinates(p.lat, p.lng, 6)),
            last_update_time: state.last_update_time,
            gps_lat: state.gps_position.as_ref().map(|p| p.lat),
            gps_lng: state.gps_position.as_ref().map(|p| p.lng),
            gps_timestamp: state.gps_position.as_ref().and_then(|p| p.timestamp),
            accel_lat: state.accelerometer_position.as_ref().map(|p| p.lat),
            accel_lng: state.accelerometer_position.as_ref().map(|p| p.lng),
            source_divergence_m: state.source_divergence_m(),
            active_sources: state.active_sources().into_iter().map(String::from).collect(),
            east_m: local.map(|v| v.x),
            north_m: local.map(|v| v.y),
            heading_deg: orientation.heading,
            pitch_deg: orientation.pitch,
            roll_deg: orientation.roll,
            gps_fixes: stats.gps_fixes,
            gps_errors: stats.gps_errors,
            last_gps_error: tracker.last_gps_error().map(|e| e.detail().into_owned()),
            geolocation_permission: tracker.geolocation_permission(),
            motion_enabled: tracker.motion_enabled(),
            motion_samples: stats.motion_samples,
            orientation_samples: stats.orientation_samples,
            flushes: stats.flushes,
            discarded_flushes: stats.discarded_flushes,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
