//! GPS source: one-shot initial fix plus a continuous watch.
//!
//! Every fix goes to the fusion loop as `GpsEvent::Fix` and is broadcast as
//! the new dead-reckoning base on a channel owned by the caller.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::TrackerConfig;
use crate::error::LocationError;
use crate::permission::{PermissionRequest, PermissionState};
use crate::types::{BaseLocation, Position};

/// Request options handed to the platform geolocation API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout_ms: u64,
    /// Oldest cached fix the platform may return.
    pub maximum_age_ms: u64,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: 20_000,
            maximum_age_ms: 60_000,
        }
    }
}

impl PositionOptions {
    /// Initial fix: never accept a cached value.
    pub fn initial(config: &TrackerConfig) -> Self {
        Self {
            enable_high_accuracy: config.enable_high_accuracy,
            timeout_ms: config.gps_timeout_ms,
            maximum_age_ms: config.initial_maximum_age_ms,
        }
    }

    /// Continuous watch: accept a fix up to a second old.
    pub fn continuous(config: &TrackerConfig) -> Self {
        Self {
            enable_high_accuracy: config.enable_high_accuracy,
            timeout_ms: config.gps_timeout_ms,
            maximum_age_ms: config.watch_maximum_age_ms,
        }
    }

    /// Permission check without a permission API: short timeout, any cached fix.
    pub fn permission_check() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: 1000,
            maximum_age_ms: u64::MAX,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

pub type FixResult = Result<Position, LocationError>;

/// Platform geolocation.
pub trait GeolocationApi: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }

    /// False outside a secure (HTTPS or localhost) context.
    fn is_secure_context(&self) -> bool {
        true
    }

    fn current_position(&self, options: PositionOptions) -> BoxFuture<'static, FixResult>;

    /// Starts delivering fixes and errors into `sink` until `clear_watch`.
    fn watch_position(&self, options: PositionOptions, sink: mpsc::Sender<FixResult>) -> WatchId;

    fn clear_watch(&self, id: WatchId);

    /// Current geolocation permission. `None` means the platform has no
    /// permission query API.
    fn query_permission(&self) -> Option<PermissionRequest> {
        None
    }
}

/// Resolves the geolocation permission state.
///
/// Uses the platform query when there is one. Otherwise, or when the query
/// errors, a position request with `PositionOptions::permission_check` decides:
/// a fix means granted, `PermissionDenied` means denied, anything else prompt.
pub async fn request_geolocation_permission(api: &dyn GeolocationApi) -> PermissionState {
    if let Some(query) = api.query_permission() {
        match query.await {
            Ok(state) => return state,
            Err(err) => log::warn!("[gps] permission query failed: {}", err),
        }
    }

    let options = PositionOptions::permission_check();
    let result = match timeout(options.timeout(), api.current_position(options)).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout),
    };
    match result {
        Ok(_) => PermissionState::Granted,
        Err(LocationError::PermissionDenied) => PermissionState::Denied,
        Err(err) => {
            log::debug!("[gps] permission check inconclusive: {}", err);
            PermissionState::Prompt
        }
    }
}

/// What the GPS source reports to the fusion loop.
#[derive(Clone, Debug, PartialEq)]
pub enum GpsEvent {
    /// Requests issued; status is unknown until the first result.
    Started,
    Fix(Position),
    Failed(LocationError),
}

/// Running GPS source. Dropping it aborts the forwarding task and clears the
/// platform watch; results still in flight are ignored.
pub struct GpsSource {
    api: Arc<dyn GeolocationApi>,
    watch_id: Option<WatchId>,
    task: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,
    publisher: Option<FixPublisher>,
    initial_options: PositionOptions,
}

impl GpsSource {
    pub fn start(
        api: Arc<dyn GeolocationApi>,
        config: &TrackerConfig,
        events: mpsc::Sender<GpsEvent>,
        base: broadcast::Sender<BaseLocation>,
    ) -> Self {
        let unavailable = if !api.is_supported() {
            Some(LocationError::NotSupported)
        } else if !api.is_secure_context() {
            Some(LocationError::InsecureContext)
        } else {
            None
        };

        let initial_options = PositionOptions::initial(config);

        if let Some(err) = unavailable {
            log::error!("[gps] {}", err);
            let _ = events.try_send(GpsEvent::Failed(err));
            return Self {
                api,
                watch_id: None,
                task: None,
                refresh_task: None,
                publisher: None,
                initial_options,
            };
        }

        let _ = events.try_send(GpsEvent::Started);

        let initial = api.current_position(initial_options);

        let (watch_tx, mut watch_rx) = mpsc::channel(config.gps_channel_capacity.max(1));
        let watch_id = api.watch_position(PositionOptions::continuous(config), watch_tx);
        log::info!("[gps] watch {:?} started", watch_id);

        let publisher = FixPublisher { events, base };
        let task_publisher = publisher.clone();
        let task = tokio::spawn(async move {
            let publisher = task_publisher;
            let one_shot = publisher.one_shot(initial, initial_options, "initial");
            // A failed one-shot never cancels the watch.
            let watch = async {
                while let Some(result) = watch_rx.recv().await {
                    publisher.publish(result, "watch").await;
                }
            };
            tokio::join!(one_shot, watch);
        });

        Self {
            api,
            watch_id: Some(watch_id),
            task: Some(task),
            refresh_task: None,
            publisher: Some(publisher),
            initial_options,
        }
    }

    /// Re-issues the one-shot request with the initial options. A refresh
    /// still in flight is superseded. Returns false when the source never
    /// started or has been stopped.
    pub fn refresh(&mut self) -> bool {
        let Some(publisher) = self.publisher.clone() else {
            return false;
        };
        if let Some(previous) = self.refresh_task.take() {
            previous.abort();
        }
        log::info!("[gps] refreshing position");
        let request = self.api.current_position(self.initial_options);
        let options = self.initial_options;
        self.refresh_task = Some(tokio::spawn(async move {
            publisher.one_shot(request, options, "refresh").await;
        }));
        true
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        self.publisher = None;
        for task in [self.task.take(), self.refresh_task.take()].into_iter().flatten() {
            task.abort();
        }
        if let Some(id) = self.watch_id.take() {
            self.api.clear_watch(id);
            log::info!("[gps] watch {:?} cleared", id);
        }
    }
}

impl Drop for GpsSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
struct FixPublisher {
    events: mpsc::Sender<GpsEvent>,
    base: broadcast::Sender<BaseLocation>,
}

impl FixPublisher {
    async fn one_shot(&self, request: BoxFuture<'static, FixResult>, options: PositionOptions, origin: &str) {
        let result = match timeout(options.timeout(), request).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout),
        };
        self.publish(result, origin).await;
    }

    async fn publish(&self, result: FixResult, origin: &str) {
        match result {
            Ok(fix) => {
                log::debug!("[gps] {} fix {:.6}, {:.6}", origin, fix.lat, fix.lng);
                let base = fix.base();
                // Receivers gone means the session is tearing down.
                let _ = self.events.send(GpsEvent::Fix(fix)).await;
                let _ = self.base.send(base);
            }
            Err(err) => {
                log::error!("[gps] {} error: {}", origin, err);
                let _ = self.events.send(GpsEvent::Failed(err)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns a scripted one-shot result and keeps the watch sink for the test to drive.
    struct ScriptedGeolocation {
        initial: Mutex<Option<FixResult>>,
        /// One-shot requests never resolve.
        hang: bool,
        permission: Option<Result<PermissionState, LocationError>>,
        requests: Mutex<Vec<PositionOptions>>,
        sink: Mutex<Option<mpsc::Sender<FixResult>>>,
        cleared: Mutex<Vec<WatchId>>,
        secure: bool,
    }

    impl ScriptedGeolocation {
        fn new(initial: FixResult) -> Self {
            Self {
                initial: Mutex::new(Some(initial)),
                hang: false,
                permission: None,
                requests: Mutex::new(Vec::new()),
                sink: Mutex::new(None),
                cleared: Mutex::new(Vec::new()),
                secure: true,
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::new(Err(LocationError::PositionUnavailable))
            }
        }
    }

    impl GeolocationApi for ScriptedGeolocation {
        fn is_secure_context(&self) -> bool {
            self.secure
        }

        fn current_position(&self, options: PositionOptions) -> BoxFuture<'static, FixResult> {
            self.requests.lock().unwrap().push(options);
            if self.hang {
                return Box::pin(std::future::pending());
            }
            let result = self
                .initial
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(LocationError::PositionUnavailable));
            Box::pin(async move { result })
        }

        fn watch_position(&self, _options: PositionOptions, sink: mpsc::Sender<FixResult>) -> WatchId {
            *self.sink.lock().unwrap() = Some(sink);
            WatchId(7)
        }

        fn clear_watch(&self, id: WatchId) {
            self.cleared.lock().unwrap().push(id);
        }

        fn query_permission(&self) -> Option<PermissionRequest> {
            self.permission
                .clone()
                .map(|answer| -> PermissionRequest { Box::pin(async move { answer }) })
        }
    }

    #[test]
    fn test_option_presets() {
        let config = TrackerConfig::default();
        let initial = PositionOptions::initial(&config);
        assert!(initial.enable_high_accuracy);
        assert_eq!(initial.timeout_ms, 10_000);
        assert_eq!(initial.maximum_age_ms, 0);
        assert_eq!(PositionOptions::continuous(&config).maximum_age_ms, 1000);
        assert_eq!(PositionOptions::default().timeout_ms, 20_000);
    }

    #[tokio::test]
    async fn test_failed_initial_does_not_cancel_watch() {
        let api = Arc::new(ScriptedGeolocation::new(Err(LocationError::Timeout)));
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (base_tx, mut base_rx) = broadcast::channel(16);

        let source = GpsSource::start(api.clone(), &TrackerConfig::default(), events_tx, base_tx);
        assert_eq!(events_rx.recv().await, Some(GpsEvent::Started));
        assert_eq!(events_rx.recv().await, Some(GpsEvent::Failed(LocationError::Timeout)));

        let sink = api.sink.lock().unwrap().clone().unwrap();
        let fix = Position::gps(43.5, -80.5, 5.0, 1000);
        sink.send(Ok(fix.clone())).await.unwrap();

        assert_eq!(events_rx.recv().await, Some(GpsEvent::Fix(fix.clone())));
        assert_eq!(base_rx.recv().await.unwrap(), fix.base());
        assert!(source.is_running());
    }

    #[tokio::test]
    async fn test_drop_clears_watch() {
        let api = Arc::new(ScriptedGeolocation::new(Ok(Position::gps(1.0, 2.0, 3.0, 4))));
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (base_tx, _base_rx) = broadcast::channel(16);

        let source = GpsSource::start(api.clone(), &TrackerConfig::default(), events_tx, base_tx);
        assert_eq!(events_rx.recv().await, Some(GpsEvent::Started));
        assert!(matches!(events_rx.recv().await, Some(GpsEvent::Fix(_))));

        drop(source);
        assert_eq!(*api.cleared.lock().unwrap(), vec![WatchId(7)]);
    }

    #[tokio::test]
    async fn test_insecure_context_fails_without_requests() {
        let mut scripted = ScriptedGeolocation::new(Ok(Position::gps(1.0, 2.0, 3.0, 4)));
        scripted.secure = false;
        let api = Arc::new(scripted);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (base_tx, _base_rx) = broadcast::channel(16);

        let source = GpsSource::start(api.clone(), &TrackerConfig::default(), events_tx, base_tx);
        assert_eq!(
            events_rx.recv().await,
            Some(GpsEvent::Failed(LocationError::InsecureContext))
        );
        assert!(!source.is_running());
        assert!(api.sink.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_request_times_out() {
        let api = Arc::new(ScriptedGeolocation::hanging());
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (base_tx, _base_rx) = broadcast::channel(16);

        let source = GpsSource::start(api.clone(), &TrackerConfig::default(), events_tx, base_tx);
        assert_eq!(events_rx.recv().await, Some(GpsEvent::Started));

        let started = tokio::time::Instant::now();
        assert_eq!(events_rx.recv().await, Some(GpsEvent::Failed(LocationError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(10_000));
        assert!(api.cleared.lock().unwrap().is_empty());

        let sink = api.sink.lock().unwrap().clone().unwrap();
        let fix = Position::gps(43.5, -80.5, 5.0, 11_000);
        sink.send(Ok(fix.clone())).await.unwrap();
        assert_eq!(events_rx.recv().await, Some(GpsEvent::Fix(fix)));
        assert!(source.is_running());
    }

    #[tokio::test]
    async fn test_permission_query_answers_directly() {
        let mut scripted = ScriptedGeolocation::new(Ok(Position::gps(1.0, 2.0, 3.0, 4)));
        scripted.permission = Some(Ok(PermissionState::Denied));

        assert_eq!(request_geolocation_permission(&scripted).await, PermissionState::Denied);
        assert!(scripted.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permission_falls_back_to_position_request() {
        let granted = ScriptedGeolocation::new(Ok(Position::gps(1.0, 2.0, 3.0, 4)));
        assert_eq!(request_geolocation_permission(&granted).await, PermissionState::Granted);
        let requests = granted.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![PositionOptions::permission_check()]);
        assert_eq!(requests[0].timeout_ms, 1000);
        assert_eq!(requests[0].maximum_age_ms, u64::MAX);

        let denied = ScriptedGeolocation::new(Err(LocationError::PermissionDenied));
        assert_eq!(request_geolocation_permission(&denied).await, PermissionState::Denied);

        // A failing query falls through to the position request.
        let mut unavailable = ScriptedGeolocation::new(Err(LocationError::PositionUnavailable));
        unavailable.permission = Some(Err(LocationError::Unknown("query unsupported".into())));
        assert_eq!(request_geolocation_permission(&unavailable).await, PermissionState::Prompt);
        assert_eq!(unavailable.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_permission_check_is_prompt() {
        let api = ScriptedGeolocation::hanging();
        let started = tokio::time::Instant::now();
        assert_eq!(request_geolocation_permission(&api).await, PermissionState::Prompt);
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(started.elapsed() < Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_refresh_reissues_one_shot() {
        let api = Arc::new(ScriptedGeolocation::new(Ok(Position::gps(1.0, 2.0, 3.0, 4))));
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (base_tx, mut base_rx) = broadcast::channel(16);

        let mut source = GpsSource::start(api.clone(), &TrackerConfig::default(), events_tx, base_tx);
        assert_eq!(events_rx.recv().await, Some(GpsEvent::Started));
        assert!(matches!(events_rx.recv().await, Some(GpsEvent::Fix(_))));
        base_rx.recv().await.unwrap();

        let fresh = Position::gps(1.5, 2.5, 3.0, 900);
        *api.initial.lock().unwrap() = Some(Ok(fresh.clone()));
        assert!(source.refresh());
        assert_eq!(events_rx.recv().await, Some(GpsEvent::Fix(fresh.clone())));
        assert_eq!(base_rx.recv().await.unwrap(), fresh.base());

        let requests = api.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], PositionOptions::initial(&TrackerConfig::default()));

        source.stop();
        assert!(!source.refresh());
    }
}
