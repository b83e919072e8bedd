//! Polling coordinator
//!
//! Keeps one periodically refreshed view of the inverter output and hands
//! snapshots of it to subscribed listeners. Device failures never escape a
//! refresh cycle: they turn into failure state, keeping the last good data.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::errors::{CoordinatorError, DeviceError, TransportError};
use crate::ez1::{Ez1Client, OutputData};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the coordinator gets its data from. [`crate::Ez1Client`] in production.
#[async_trait]
pub trait OutputSource: Send + Sync {
    async fn fetch_output(&self) -> Result<OutputData, DeviceError>;

    /// Short label for log lines
    fn describe(&self) -> String;
}

#[async_trait]
impl OutputSource for Ez1Client {
    async fn fetch_output(&self) -> Result<OutputData, DeviceError> {
        self.get_output_data().await
    }

    fn describe(&self) -> String {
        self.base_url().to_string()
    }
}

/// When listeners hear about a finished refresh cycle
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    /// Every completed cycle
    #[default]
    Always,
    /// Only when `last_success` flipped (the first cycle counts)
    SuccessTransition,
    /// Only when the fetched data differs from the previous snapshot
    DataChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub notify: NotifyMode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            notify: NotifyMode::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.interval < MIN_INTERVAL {
            return Err(CoordinatorError::InvalidConfig(format!(
                "interval {:?} is below the minimum of {:?}",
                self.interval, MIN_INTERVAL
            )));
        }
        if self.fetch_timeout.is_zero() {
            return Err(CoordinatorError::InvalidConfig(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Immutable view of the coordinator handed to listeners and readers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RefreshState {
    pub last_data: Option<OutputData>,
    pub last_success: bool,
    pub last_error: Option<DeviceError>,
    /// `None` until the first cycle completed
    pub last_update: Option<DateTime<Utc>>,
}

impl RefreshState {
    /// Data is present but the latest cycle failed.
    pub fn is_stale(&self) -> bool {
        self.last_data.is_some() && !self.last_success
    }
}

/// What a call to [`PollingCoordinator::refresh`] ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success,
    Failure,
    /// Another fetch was already in flight
    Skipped,
    /// The coordinator is shut down, or shut down mid-fetch
    Cancelled,
}

pub trait Listener: Send {
    fn on_refresh(&mut self, state: &RefreshState);
}

impl<F> Listener for F
where
    F: FnMut(&RefreshState) + Send,
{
    fn on_refresh(&mut self, state: &RefreshState) {
        self(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the in-flight flag even when the fetch future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Resolves once shutdown was requested.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        // Sender gone, nobody can restart us
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

pub struct PollingCoordinator<S> {
    source: S,
    config: CoordinatorConfig,
    state: Mutex<RefreshState>,
    listeners: Mutex<Vec<(ListenerId, Box<dyn Listener>)>>,
    next_listener_id: AtomicU64,
    in_flight: AtomicBool,
    refresh_requested: Notify,
    shutdown: watch::Sender<bool>,
}

impl<S: OutputSource> PollingCoordinator<S> {
    pub fn new(source: S, config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            source,
            config,
            state: Mutex::new(RefreshState::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            refresh_requested: Notify::new(),
            shutdown,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn snapshot(&self) -> RefreshState {
        lock(&self.state).clone()
    }

    pub fn subscribe(&self, listener: impl Listener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Box::new(listener)));
        id
    }

    /// Returns whether the listener was still registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop scheduling and cancel any fetch in flight.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Shutting down coordinator for {}", self.source.describe());
        }
    }

    /// Resolves once [`PollingCoordinator::shutdown`] was called.
    pub async fn wait_for_shutdown(&self) {
        shutdown_requested(self.shutdown.subscribe()).await
    }

    /// Retry `op` every `retry` until it succeeds. `None` when shut down first.
    ///
    /// Used for startup queries while the inverter is still offline (at night
    /// it has no power).
    pub async fn retry_until_ready<T, F, Fut>(&self, retry: Duration, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeviceError>>,
    {
        let mut attempts = 0u32;
        while !self.is_shut_down() {
            let result = tokio::select! {
                result = op() => result,
                _ = self.wait_for_shutdown() => return None,
            };
            match result {
                Ok(value) => return Some(value),
                Err(e) if attempts == 0 => warn!(
                    "Inverter {} not ready: {}, retrying every {:?}",
                    self.source.describe(),
                    e,
                    retry
                ),
                Err(e) => debug!("Inverter {} still not ready: {}", self.source.describe(), e),
            }
            attempts += 1;

            tokio::select! {
                _ = tokio::time::sleep(retry) => {}
                _ = self.wait_for_shutdown() => return None,
            }
        }
        None
    }

    /// Ask the running loop for an immediate refresh.
    ///
    /// Only wakes a loop that is waiting for its next cycle; a request made
    /// while a fetch is in flight is dropped, not queued.
    pub fn request_refresh(&self) {
        self.refresh_requested.notify_waiters();
    }

    async fn fetch(&self) -> Result<OutputData, DeviceError> {
        match tokio::time::timeout(self.config.fetch_timeout, self.source.fetch_output()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                endpoint: "getOutputData".to_string(),
                timeout: self.config.fetch_timeout,
            }
            .into()),
        }
    }

    /// Run one refresh cycle now.
    ///
    /// A call made while another fetch is in flight returns
    /// [`RefreshOutcome::Skipped`] without fetching or queueing.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.is_shut_down() {
            return RefreshOutcome::Cancelled;
        }
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("Refresh already in flight, skipping");
            return RefreshOutcome::Skipped;
        };

        let started = std::time::Instant::now();
        let result = tokio::select! {
            result = self.fetch() => result,
            _ = shutdown_requested(self.shutdown.subscribe()) => {
                debug!("Fetch cancelled by shutdown");
                return RefreshOutcome::Cancelled;
            }
        };
        debug!(
            "Finished fetching output data in {:.3}s (success: {})",
            started.elapsed().as_secs_f64(),
            result.is_ok()
        );

        let (outcome, notify) = self.apply(result);
        if let Some(snapshot) = notify {
            self.notify_listeners(&snapshot);
        }
        outcome
    }

    /// Fold a fetch result into the state; returns the snapshot to publish, if any.
    fn apply(
        &self,
        result: Result<OutputData, DeviceError>,
    ) -> (RefreshOutcome, Option<RefreshState>) {
        let mut state = lock(&self.state);
        let first_cycle = state.last_update.is_none();
        let previous_success = state.last_success;
        let previous_data = state.last_data;
        let previous_error = state.last_error.clone();

        let outcome = match result {
            Ok(data) => {
                if !previous_success && !first_cycle {
                    info!("Fetching output data from {} recovered", self.source.describe());
                }
                state.last_data = Some(data);
                state.last_success = true;
                state.last_error = None;
                RefreshOutcome::Success
            }
            Err(err) => {
                state.last_success = false;
                state.last_error = Some(err);
                RefreshOutcome::Failure
            }
        };
        state.last_update = Some(Utc::now());

        let repeated_failure = !first_cycle
            && !previous_success
            && !state.last_success
            && previous_error == state.last_error;

        if let Some(err) = &state.last_error {
            let source = self.source.describe();
            match err {
                _ if repeated_failure => debug!("Inverter {} still failing: {}", source, err),
                DeviceError::Transport(e) => warn!("Inverter {} not available: {}", source, e),
                DeviceError::Protocol(e) => error!("Unexpected response from {}: {}", source, e),
                DeviceError::Validation(e) => error!("Invalid request to {}: {}", source, e),
            }
        }

        let changed = match self.config.notify {
            NotifyMode::Always => true,
            NotifyMode::SuccessTransition => first_cycle || previous_success != state.last_success,
            NotifyMode::DataChange => previous_data != state.last_data,
        };

        let snapshot = (changed && !repeated_failure).then(|| state.clone());
        (outcome, snapshot)
    }

    fn notify_listeners(&self, snapshot: &RefreshState) {
        let mut listeners = lock(&self.listeners);
        debug!("Notifying {} listener(s)", listeners.len());
        for (_, listener) in listeners.iter_mut() {
            listener.on_refresh(snapshot);
        }
    }

    /// Refresh on every interval or on request until [`PollingCoordinator::shutdown`].
    pub async fn run(&self) {
        info!(
            "Polling {} every {:?}",
            self.source.describe(),
            self.config.interval
        );
        let shutdown = shutdown_requested(self.shutdown.subscribe());
        tokio::pin!(shutdown);

        while !self.is_shut_down() {
            self.refresh().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.refresh_requested.notified() => {
                    debug!("Refresh requested");
                }
                _ = &mut shutdown => break,
            }
        }
        info!("Polling of {} stopped", self.source.describe());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProtocolError;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Returns queued results in order, then repeats the last one.
    struct ScriptedSource {
        results: Mutex<VecDeque<Result<OutputData, DeviceError>>>,
        calls: AtomicU64,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<OutputData, DeviceError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl OutputSource for ScriptedSource {
        async fn fetch_output(&self) -> Result<OutputData, DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = lock(&self.results);
            if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                results.front().cloned().unwrap()
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Blocks every fetch until released.
    struct GatedSource {
        gate: Arc<Notify>,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl OutputSource for GatedSource {
        async fn fetch_output(&self) -> Result<OutputData, DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(sample(1.0))
        }

        fn describe(&self) -> String {
            "gated".to_string()
        }
    }

    fn sample(p1: f64) -> OutputData {
        OutputData {
            p1,
            e1: 1.0,
            te1: 10.0,
            p2: 2.0,
            e2: 1.5,
            te2: 11.0,
        }
    }

    fn offline() -> DeviceError {
        TransportError::Request {
            endpoint: "getOutputData".to_string(),
            reason: "connection refused".to_string(),
        }
        .into()
    }

    fn http_500() -> DeviceError {
        TransportError::Status {
            endpoint: "getOutputData".to_string(),
            status: 500,
        }
        .into()
    }

    fn coordinator(
        results: Vec<Result<OutputData, DeviceError>>,
        notify: NotifyMode,
    ) -> PollingCoordinator<ScriptedSource> {
        let config = CoordinatorConfig {
            notify,
            ..CoordinatorConfig::default()
        };
        PollingCoordinator::new(ScriptedSource::new(results), config).unwrap()
    }

    fn recorder<S: OutputSource>(
        coordinator: &PollingCoordinator<S>,
    ) -> Arc<Mutex<Vec<RefreshState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        coordinator.subscribe(move |state: &RefreshState| lock(&sink).push(state.clone()));
        seen
    }

    #[test]
    fn test_config_rejects_short_interval() {
        let config = CoordinatorConfig {
            interval: Duration::from_millis(200),
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            PollingCoordinator::new(ScriptedSource::new(vec![Ok(sample(1.0))]), config),
            Err(CoordinatorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let config = CoordinatorConfig {
            fetch_timeout: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_success_updates_state() {
        let coordinator = coordinator(vec![Ok(sample(5.0))], NotifyMode::Always);
        assert_eq!(coordinator.snapshot(), RefreshState::default());

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Success);
        let state = coordinator.snapshot();
        assert_eq!(state.last_data, Some(sample(5.0)));
        assert!(state.last_success);
        assert!(state.last_error.is_none());
        assert!(state.last_update.is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_data() {
        let coordinator = coordinator(vec![Ok(sample(5.0)), Err(offline())], NotifyMode::Always);
        coordinator.refresh().await;
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Failure);

        let state = coordinator.snapshot();
        assert_eq!(state.last_data, Some(sample(5.0)));
        assert!(!state.last_success);
        assert_eq!(state.last_error, Some(offline()));
        assert!(state.is_stale());
    }

    #[tokio::test]
    async fn test_identical_failures_notify_once() {
        let coordinator = coordinator(
            vec![Ok(sample(5.0)), Err(offline()), Err(offline())],
            NotifyMode::Always,
        );
        let seen = recorder(&coordinator);

        coordinator.refresh().await;
        coordinator.refresh().await;
        coordinator.refresh().await;

        let seen = lock(&seen);
        assert_eq!(seen.len(), 2);
        assert!(seen[0].last_success);
        assert!(!seen[1].last_success);
    }

    #[tokio::test]
    async fn test_different_failure_notifies_again() {
        let coordinator = coordinator(
            vec![Err(offline()), Err(offline()), Err(http_500())],
            NotifyMode::Always,
        );
        let seen = recorder(&coordinator);

        for _ in 0..3 {
            assert_eq!(coordinator.refresh().await, RefreshOutcome::Failure);
        }

        let seen = lock(&seen);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].last_error, Some(offline()));
        assert_eq!(seen[1].last_error, Some(http_500()));
    }

    #[tokio::test]
    async fn test_recovery_notifies() {
        let coordinator = coordinator(
            vec![Err(offline()), Err(offline()), Ok(sample(3.0))],
            NotifyMode::SuccessTransition,
        );
        let seen = recorder(&coordinator);

        for _ in 0..3 {
            coordinator.refresh().await;
        }

        let seen = lock(&seen);
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].last_success);
        assert!(seen[1].last_success);
        assert_eq!(seen[1].last_data, Some(sample(3.0)));
    }

    #[tokio::test]
    async fn test_always_mode_notifies_unchanged_success() {
        let coordinator = coordinator(vec![Ok(sample(1.0))], NotifyMode::Always);
        let seen = recorder(&coordinator);
        for _ in 0..3 {
            coordinator.refresh().await;
        }
        assert_eq!(lock(&seen).len(), 3);
    }

    #[tokio::test]
    async fn test_success_transition_mode_ignores_steady_success() {
        let coordinator = coordinator(
            vec![Ok(sample(1.0)), Ok(sample(2.0)), Ok(sample(3.0))],
            NotifyMode::SuccessTransition,
        );
        let seen = recorder(&coordinator);
        for _ in 0..3 {
            coordinator.refresh().await;
        }
        assert_eq!(lock(&seen).len(), 1);
    }

    #[tokio::test]
    async fn test_data_change_mode() {
        let coordinator = coordinator(
            vec![
                Ok(sample(1.0)),
                Ok(sample(1.0)),
                Ok(sample(2.0)),
                Err(offline()),
            ],
            NotifyMode::DataChange,
        );
        let seen = recorder(&coordinator);
        for _ in 0..4 {
            coordinator.refresh().await;
        }

        let seen = lock(&seen);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].last_data, Some(sample(1.0)));
        assert_eq!(seen[1].last_data, Some(sample(2.0)));
    }

    #[tokio::test]
    async fn test_protocol_error_is_recoverable_failure() {
        let protocol: DeviceError = ProtocolError::MissingData {
            endpoint: "getOutputData".to_string(),
        }
        .into();
        let coordinator = coordinator(vec![Err(protocol.clone()), Ok(sample(1.0))], NotifyMode::Always);

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Failure);
        assert_eq!(coordinator.snapshot().last_error, Some(protocol));
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Success);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let coordinator = coordinator(vec![Ok(sample(1.0))], NotifyMode::Always);
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let id = coordinator.subscribe(move |_: &RefreshState| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.refresh().await;
        assert!(coordinator.unsubscribe(id));
        assert!(!coordinator.unsubscribe(id));
        coordinator.refresh().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_fetch_in_flight() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU64::new(0));
        let coordinator = Arc::new(
            PollingCoordinator::new(
                GatedSource {
                    gate: gate.clone(),
                    calls: calls.clone(),
                },
                CoordinatorConfig::default(),
            )
            .unwrap(),
        );

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Skipped);
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Skipped);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), RefreshOutcome::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out_as_transport_failure() {
        let gate = Arc::new(Notify::new());
        let coordinator = PollingCoordinator::new(
            GatedSource {
                gate,
                calls: Arc::new(AtomicU64::new(0)),
            },
            CoordinatorConfig {
                fetch_timeout: Duration::from_secs(2),
                ..CoordinatorConfig::default()
            },
        )
        .unwrap();

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Failure);
        assert!(matches!(
            coordinator.snapshot().last_error,
            Some(DeviceError::Transport(TransportError::Timeout { .. }))
        ));
        // The flag was released, so the next cycle fetches again
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Failure);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_fetch() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU64::new(0));
        let coordinator = Arc::new(
            PollingCoordinator::new(
                GatedSource {
                    gate,
                    calls: calls.clone(),
                },
                CoordinatorConfig::default(),
            )
            .unwrap(),
        );
        let seen = recorder(&coordinator);

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        coordinator.shutdown();
        assert_eq!(pending.await.unwrap(), RefreshOutcome::Cancelled);
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lock(&seen).is_empty());
        assert_eq!(coordinator.snapshot(), RefreshState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval_until_shutdown() {
        let coordinator = Arc::new(coordinator(vec![Ok(sample(1.0))], NotifyMode::Always));
        let seen = recorder(&coordinator);

        let task = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run().await }
        });

        // Immediate first cycle, then one per 10s interval
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(lock(&seen).len(), 3);

        coordinator.shutdown();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(lock(&seen).len(), 3);
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_refresh_wakes_loop() {
        let coordinator = Arc::new(coordinator(vec![Ok(sample(1.0))], NotifyMode::Always));
        let task = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run().await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 1);

        coordinator.request_refresh();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 2);

        coordinator.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_during_fetch_is_dropped() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU64::new(0));
        let coordinator = Arc::new(
            PollingCoordinator::new(
                GatedSource {
                    gate: gate.clone(),
                    calls: calls.clone(),
                },
                CoordinatorConfig::default(),
            )
            .unwrap(),
        );
        let task = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run().await }
        });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        coordinator.request_refresh();
        gate.notify_one();

        // Nobody was waiting for the request, so only the interval fetches again
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        coordinator.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_ready_waits_for_device() {
        let coordinator = coordinator(vec![Ok(sample(1.0))], NotifyMode::Always);
        let attempts = AtomicU64::new(0);
        let started = tokio::time::Instant::now();

        let result = coordinator
            .retry_until_ready(Duration::from_secs(10), || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(offline())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Some(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_ready_stops_on_shutdown() {
        let coordinator = Arc::new(coordinator(vec![Ok(sample(1.0))], NotifyMode::Always));
        let task = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .retry_until_ready(Duration::from_secs(10), || async { Err::<(), _>(offline()) })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(15)).await;
        coordinator.shutdown();
        assert_eq!(task.await.unwrap(), None);
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ez1_client_as_source() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/getOutputData")
            .with_status(200)
            .with_body(
                r#"{"data": {"p1": 1.0, "e1": 1.0, "te1": 10.0, "p2": 2.0, "e2": 1.5, "te2": 11.0}}"#,
            )
            .create_async()
            .await;
        let client = Ez1Client::with_base_url(server.url(), Duration::from_secs(2)).unwrap();
        let coordinator = PollingCoordinator::new(client, CoordinatorConfig::default()).unwrap();

        assert_eq!(coordinator.source().describe(), server.url());
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Success);
        assert_eq!(coordinator.snapshot().last_data, Some(sample(1.0)));
        mock.assert_async().await;
    }
}
