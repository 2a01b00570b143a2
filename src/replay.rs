//! Recorded-session replay.
//!
//! A log is a list of timestamped records. Replay drives a `ManualClock` to
//! each record's `t` and feeds the tracker synchronously, so a given log
//! always produces the same final state.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::clock::ManualClock;
use crate::config::TrackerConfig;
use crate::error::{LocationError, ReplayError};
use crate::gps::GpsEvent;
use crate::sensor_fusion::FusionEvent;
use crate::tracker::HybridTracker;
use crate::types::{MotionSample, OrientationReading, Position, PositionSource};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    pub records: Vec<ReplayRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Milliseconds since the Unix epoch.
    pub t: i64,
    #[serde(flatten)]
    pub entry: ReplayEntry,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayEntry {
    Gps {
        lat: f64,
        lng: f64,
        #[serde(default)]
        accuracy: Option<f64>,
        /// Fix time; defaults to the record time.
        #[serde(default)]
        timestamp: Option<i64>,
    },
    GpsError {
        code: u16,
    },
    Motion {
        ax: f64,
        ay: f64,
        az: f64,
    },
    Orientation {
        #[serde(default)]
        alpha: Option<f64>,
        #[serde(default)]
        beta: Option<f64>,
        #[serde(default)]
        gamma: Option<f64>,
    },
    /// Raw fusion event, `{"type": ..., "payload": ...}`.
    Event {
        event: FusionEvent,
    },
}

impl ReplayLog {
    /// Reads a `.json` or `.json.gz` log.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if path.extension().map(|e| e == "gz").unwrap_or(false) {
            Self::from_reader(GzDecoder::new(file))
        } else {
            Self::from_reader(file)
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReplayError> {
        Ok(serde_json::from_reader(BufReader::new(reader))?)
    }

    pub fn from_json(text: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn duration_ms(&self) -> i64 {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => last.t.saturating_sub(first.t),
            _ => 0,
        }
    }
}

pub struct Replayer {
    clock: ManualClock,
    tracker: HybridTracker,
    applied: usize,
}

impl Replayer {
    pub fn new(config: &TrackerConfig) -> Self {
        let clock = ManualClock::new(0);
        let mut tracker = HybridTracker::new(config, Arc::new(clock.clone()));
        tracker.set_motion_enabled(config.enable_motion);
        Self {
            clock,
            tracker,
            applied: 0,
        }
    }

    pub fn apply(&mut self, record: &ReplayRecord) {
        self.clock.set(record.t);
        match &record.entry {
            ReplayEntry::Gps {
                lat,
                lng,
                accuracy,
                timestamp,
            } => {
                let fix = Position {
                    lat: *lat,
                    lng: *lng,
                    accuracy: *accuracy,
                    timestamp: Some(timestamp.unwrap_or(record.t)),
                    source: PositionSource::Gps,
                };
                let base = fix.base();
                // Same order as the live source: reducer first, then the broadcast.
                self.tracker.handle_gps(GpsEvent::Fix(fix));
                self.tracker.rebase(base);
            }
            ReplayEntry::GpsError { code } => {
                self.tracker
                    .handle_gps(GpsEvent::Failed(LocationError::from_code(*code)));
            }
            ReplayEntry::Motion { ax, ay, az } => {
                self.tracker
                    .feed_motion(&MotionSample::new(*ax, *ay, *az, record.t));
            }
            ReplayEntry::Orientation { alpha, beta, gamma } => {
                self.tracker.feed_orientation(&OrientationReading {
                    alpha: *alpha,
                    beta: *beta,
                    gamma: *gamma,
                    timestamp_ms: record.t,
                });
            }
            ReplayEntry::Event { event } => {
                self.tracker.dispatch(event.clone());
            }
        }
        self.applied += 1;
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn into_tracker(self) -> HybridTracker {
        self.tracker
    }
}

/// Replays a whole log and returns the tracker in its final state.
pub fn replay(log: &ReplayLog, config: &TrackerConfig) -> HybridTracker {
    let mut replayer = Replayer::new(config);
    for record in &log.records {
        replayer.apply(record);
    }
    log::info!("[fusion] replayed {} records", replayer.applied());
    replayer.into_tracker()
}
