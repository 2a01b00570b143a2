//! Motion and orientation permission negotiation.
//!
//! Some platforms gate sensor access behind an explicit request. Where no
//! request API exists, access is implicitly granted.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::LocationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

pub type PermissionRequest = BoxFuture<'static, Result<PermissionState, LocationError>>;

/// Platform permission prompts. `None` means the platform has no request API.
pub trait MotionPermissionApi: Send + Sync {
    fn request_motion_permission(&self) -> Option<PermissionRequest>;
    fn request_orientation_permission(&self) -> Option<PermissionRequest>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOutcome {
    pub motion: PermissionState,
    pub orientation: PermissionState,
}

impl PermissionOutcome {
    pub const IMPLICIT: Self = Self {
        motion: PermissionState::Granted,
        orientation: PermissionState::Granted,
    };

    /// Dead reckoning needs both sensors.
    pub fn is_granted(&self) -> bool {
        self.motion == PermissionState::Granted && self.orientation == PermissionState::Granted
    }
}

#[derive(Debug, Default)]
pub struct MotionPermissionGate {
    last_outcome: Option<PermissionOutcome>,
}

impl MotionPermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests both permissions in turn. The second request is made even if
    /// the first one errors; any error is reported after both have run.
    pub async fn negotiate(
        &mut self,
        api: &dyn MotionPermissionApi,
    ) -> Result<PermissionOutcome, LocationError> {
        let motion = resolve(api.request_motion_permission(), "motion").await;
        let orientation = resolve(api.request_orientation_permission(), "orientation").await;

        let outcome = PermissionOutcome {
            motion: motion?,
            orientation: orientation?,
        };
        log::info!(
            "[motion] permission motion={:?} orientation={:?}",
            outcome.motion,
            outcome.orientation
        );
        self.last_outcome = Some(outcome);
        Ok(outcome)
    }

    pub fn last_outcome(&self) -> Option<PermissionOutcome> {
        self.last_outcome
    }
}

async fn resolve(
    request: Option<PermissionRequest>,
    label: &str,
) -> Result<PermissionState, LocationError> {
    match request {
        None => Ok(PermissionState::Granted),
        Some(request) => {
            let result = request.await;
            if let Err(err) = &result {
                log::error!("[motion] {} permission request failed: {}", label, err);
            }
            result
        }
    }
}
