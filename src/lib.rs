pub mod accumulator;
pub mod anchor;
pub mod clock;
pub mod config;
pub mod dead_reckoning;
pub mod error;
pub mod gps;
pub mod live_status;
pub mod orientation;
pub mod permission;
pub mod replay;
pub mod sensor_fusion;
pub mod sensors;
pub mod session;
pub mod tracker;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use error::{ConfigError, LocationError, ReplayError};
pub use sensor_fusion::{reduce, FusionEvent, FusionState, LocationStore, SubscriptionId};
pub use tracker::{HybridTracker, TrackerStats};
pub use types::{BaseLocation, LocationStatus, Position, PositionSource};
