// sensor_fusion.rs: location fusion state machine
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - platform geolocation and motion APIs
//   - file I/O, live status, replay
//
// Discrete events in, one authoritative FusionState out. `reduce` is a pure
// function of (state, event, now); `LocationStore` owns the state, stamps
// events with its clock and notifies subscribers.

use std::sync::Arc;

use geo::{point, HaversineDistance};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::types::{LocationStatus, Position};

/// Reference freshness window for GPS precedence.
pub const GPS_FRESHNESS_MS: i64 = 5000;

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionState {
    pub status: LocationStatus,
    /// Position chosen by the fusion policy.
    pub position: Option<Position>,
    /// Latest GPS fix, whether or not it is the chosen position.
    pub gps_position: Option<Position>,
    /// Latest dead-reckoned position, whether or not it is the chosen position.
    pub accelerometer_position: Option<Position>,
    pub last_update_time: i64,
}

impl FusionState {
    /// Distance in metres between the latest GPS and dead-reckoned positions.
    pub fn source_divergence_m(&self) -> Option<f64> {
        let gps = self.gps_position.as_ref()?;
        let accel = self.accelerometer_position.as_ref()?;
        let a = point!(x: gps.lng, y: gps.lat);
        let b = point!(x: accel.lng, y: accel.lat);
        Some(a.haversine_distance(&b))
    }

    /// Labels of the per-source positions currently held.
    pub fn active_sources(&self) -> Vec<&'static str> {
        let mut sources = Vec::new();
        if self.gps_position.is_some() {
            sources.push("gps");
        }
        if self.accelerometer_position.is_some() {
            sources.push("accelerometer");
        }
        sources
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Inputs to the reducer. Encoded as `{"type": ..., "payload": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FusionEvent {
    /// Generic path: adopt a position without touching per-source slots.
    SetLocation(Position),
    SetGpsLocation(Position),
    SetAccelerometerLocation(Position),
    #[serde(rename = "SET_LOCATION_STATUS")]
    SetStatus(LocationStatus),
    #[serde(rename = "CLEAR_LOCATION")]
    Clear,
    /// Any event kind this build does not know. Always a no-op.
    #[serde(other)]
    Unrecognized,
}

// ─── Reducer ─────────────────────────────────────────────────────────────────

/// Pure transition function. Never fails; unknown events return the state unchanged.
pub fn reduce(state: &FusionState, event: &FusionEvent, now_ms: i64, gps_freshness_ms: i64) -> FusionState {
    match event {
        FusionEvent::SetLocation(pos) => FusionState {
            status: LocationStatus::Accessed,
            position: Some(pos.clone()),
            last_update_time: now_ms,
            ..state.clone()
        },
        FusionEvent::SetGpsLocation(pos) => FusionState {
            status: LocationStatus::Accessed,
            gps_position: Some(pos.clone()),
            position: Some(pos.clone()),
            last_update_time: now_ms,
            ..state.clone()
        },
        FusionEvent::SetAccelerometerLocation(pos) => {
            let position = if gps_is_fresh(state.gps_position.as_ref(), now_ms, gps_freshness_ms) {
                state.position.clone()
            } else {
                Some(pos.clone())
            };
            FusionState {
                status: LocationStatus::Accessed,
                accelerometer_position: Some(pos.clone()),
                position,
                last_update_time: now_ms,
                ..state.clone()
            }
        }
        FusionEvent::SetStatus(status) => FusionState {
            status: *status,
            ..state.clone()
        },
        FusionEvent::Clear => FusionState::default(),
        FusionEvent::Unrecognized => state.clone(),
    }
}

/// A GPS fix keeps precedence while it is younger than the freshness window.
/// Fixes without a timestamp are aged from the epoch.
fn gps_is_fresh(gps: Option<&Position>, now_ms: i64, freshness_ms: i64) -> bool {
    match gps {
        Some(fix) => now_ms.saturating_sub(fix.timestamp.unwrap_or(0)) < freshness_ms,
        None => false,
    }
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&FusionState) + Send>;

/// Exclusive owner of the fusion state. Consumers read it or subscribe to it;
/// the only way to change it is `dispatch`.
pub struct LocationStore {
    state: FusionState,
    clock: Arc<dyn Clock>,
    gps_freshness_ms: i64,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl LocationStore {
    pub fn new(clock: Arc<dyn Clock>, gps_freshness_ms: i64) -> Self {
        Self {
            state: FusionState::default(),
            clock,
            gps_freshness_ms,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn state(&self) -> &FusionState {
        &self.state
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Applies one event synchronously and notifies subscribers if the state changed.
    pub fn dispatch(&mut self, event: FusionEvent) -> &FusionState {
        let now = self.clock.now_ms();
        let next = reduce(&self.state, &event, now, self.gps_freshness_ms);

        if next == self.state {
            return &self.state;
        }

        if next.status != self.state.status {
            log::debug!("[fusion] status {:?} -> {:?}", self.state.status, next.status);
        }
        if let FusionEvent::SetAccelerometerLocation(_) = event {
            if next.position == self.state.position {
                log::debug!("[fusion] GPS still fresh, dead-reckoned position held back");
            }
        }

        self.state = next;
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&self.state);
        }
        &self.state
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&FusionState) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
