//! Processing-status sync facade.
//!
//! [`ProcessingSync`] owns one streaming connection to the backend and
//! the job state it feeds. It is constructed explicitly (one per open
//! dashboard session) and torn down with [`ProcessingSync::shutdown`] or
//! by dropping it.
//!
//! A background task drives the connection: connect -> session ->
//! reconnect, until the reconnect budget is spent or
//! [`ProcessingSync::disconnect`] cancels it. Every decoded frame is
//! applied to the [`JobStore`] first and then fanned out to subscribers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use briefing_core::{JobState, Outcome};
use briefing_events::{Notification, NotificationBus, SubscriberRegistry, SubscriptionId};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, HttpStatusApi, StartAck, StartOptions, StatusApi, StopAck};
use crate::client::{ClientError, ConnectionStatus, Connector, Transport, WsConnector};
use crate::config::{ConfigError, SyncConfig};
use crate::messages::{parse_event, InboundEvent, HEARTBEAT, STATUS_REQUEST};
use crate::processor::{ConnectionNotifier, EventClassifier};
use crate::reconnect::{self, ReconnectPolicy};
use crate::store::JobStore;

/// How long [`ProcessingSync::shutdown`] waits for the connection task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer-facing handle on the processing-status sync.
pub struct ProcessingSync {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    driver: Mutex<Option<Driver>>,
    /// Master cancellation token -- cancelled on drop.
    cancel: CancellationToken,
}

/// The running connection task.
struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// State shared between the facade and the connection task.
struct Shared {
    config: SyncConfig,
    store: JobStore,
    registry: SubscriberRegistry<InboundEvent>,
    bus: Arc<NotificationBus>,
    api: Arc<dyn StatusApi>,
    status: watch::Sender<ConnectionStatus>,
    /// Sender into the live session, if any.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    attempts: AtomicU32,
    classifier: Mutex<EventClassifier>,
    notifier: Mutex<ConnectionNotifier>,
    /// Cancels user-issued snapshot fetches; replaced on disconnect.
    fetches: Mutex<CancellationToken>,
    request_error: Mutex<Option<String>>,
    connection_error: Mutex<Option<String>>,
}

impl ProcessingSync {
    /// Build a sync over the given transport and REST collaborator. Does
    /// not connect; call [`connect`](Self::connect).
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        api: Arc<dyn StatusApi>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let store = JobStore::new(config.log_window);
        let bus = Arc::new(NotificationBus::default());
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);

        let shared = Shared {
            classifier: Mutex::new(EventClassifier::new(store.clone(), Arc::clone(&bus))),
            notifier: Mutex::new(ConnectionNotifier::default()),
            fetches: Mutex::new(cancel.child_token()),
            config,
            store,
            registry: SubscriberRegistry::new(),
            bus,
            api,
            status,
            outbound: Mutex::new(None),
            attempts: AtomicU32::new(0),
            request_error: Mutex::new(None),
            connection_error: Mutex::new(None),
        };

        Ok(Self {
            shared: Arc::new(shared),
            connector,
            driver: Mutex::new(None),
            cancel,
        })
    }

    /// WebSocket transport and HTTP collaborator, both resolved from
    /// `config`.
    pub fn from_config(config: SyncConfig) -> Result<Self, ConfigError> {
        let connector = Arc::new(WsConnector::from_config(&config)?);
        let api = Arc::new(HttpStatusApi::new(config.api_url()));
        Self::new(config, connector, api)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    // ---- connection lifecycle ----

    /// Open the streaming connection in the background.
    ///
    /// No-op while a connection is open or being opened. Otherwise any
    /// stale connection task is cancelled and a fresh one spawned with a
    /// full reconnect budget. Must be called within a Tokio runtime.
    pub fn connect(&self) {
        let mut slot = lock(&self.driver);
        if let Some(driver) = slot.as_ref() {
            let status = *self.shared.status.borrow();
            if !driver.handle.is_finished()
                && matches!(
                    status,
                    ConnectionStatus::Connecting | ConnectionStatus::Connected
                )
            {
                tracing::debug!(%status, "Already connected, ignoring connect()");
                return;
            }
        }
        if let Some(stale) = slot.take() {
            stale.cancel.cancel();
        }

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(run_connection_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            cancel.clone(),
        ));
        *slot = Some(Driver { cancel, handle });
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Cancels a pending reconnect delay, the heartbeat and any in-flight
    /// snapshot fetch. The only path that permanently stops reconnection.
    pub fn disconnect(&self) {
        // The task winds down on its own once cancelled.
        drop(self.stop_driver());
    }

    /// [`disconnect`](Self::disconnect), then wait for the connection
    /// task to finish closing the transport.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down processing sync");
        if let Some(handle) = self.stop_driver() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Connection task did not stop in time");
            }
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    /// Receiver notified on every connection status change.
    ///
    /// A failed connection passes through [`ConnectionStatus::Error`] and
    /// straight on to [`ConnectionStatus::Disconnected`], so receivers
    /// usually only observe the latter. The cause stays available from
    /// [`last_connection_error`](Self::last_connection_error).
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Reconnect attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Last transport error, cleared on the next successful connect.
    pub fn last_connection_error(&self) -> Option<String> {
        lock(&self.shared.connection_error).clone()
    }

    /// Send a text frame on the live connection.
    ///
    /// Returns whether the frame was handed to the transport; `false`
    /// unless the status is [`ConnectionStatus::Connected`]. There is no
    /// delivery acknowledgement.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if self.connection_status() != ConnectionStatus::Connected {
            return false;
        }
        match lock(&self.shared.outbound).as_ref() {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    /// Ask the backend for an immediate `status_update`.
    pub fn request_status(&self) -> bool {
        self.send(STATUS_REQUEST)
    }

    // ---- job state ----

    pub fn state(&self) -> JobState {
        self.shared.store.state()
    }

    /// Receiver notified on every job state change.
    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.shared.store.subscribe()
    }

    /// Register a callback for every decoded inbound event. Callbacks
    /// run on the connection task and see the store already updated.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.registry.unsubscribe(id)
    }

    /// User-facing job and connection notifications.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.bus.subscribe()
    }

    /// Last failed start/stop/status request, cleared by the next
    /// successful one.
    pub fn request_error(&self) -> Option<String> {
        lock(&self.shared.request_error).clone()
    }

    /// Load an authoritative snapshot from the backend.
    ///
    /// Cancelled by [`disconnect`](Self::disconnect).
    pub async fn refresh(&self) -> Result<JobState, SyncError> {
        let cancel = lock(&self.shared.fetches).clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = self.shared.api.get_status() => result,
        };
        match result {
            Ok(snapshot) => {
                self.shared.store.load_snapshot(snapshot);
                self.shared.clear_request_error();
                Ok(self.state())
            }
            Err(e) => Err(self.shared.request_failed("load processing status", e)),
        }
    }

    /// Start a processing run.
    ///
    /// The local state enters `running` before the request is sent and
    /// is rolled back if it fails. When the backend reports a run already
    /// in progress, its snapshot is loaded instead.
    pub async fn start(&self, options: StartOptions) -> Result<StartAck, SyncError> {
        let optimistic = self.shared.store.begin_run().ok();
        if optimistic.is_some() {
            lock(&self.shared.classifier).clear();
        }

        match self.shared.api.start(&options).await {
            Ok(ack) => {
                self.shared.clear_request_error();
                tracing::info!(status = %ack.status, message = %ack.message, "Start acknowledged");
                if ack.is_already_running() {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!(error = %e, "Failed to load running job after start");
                    }
                }
                Ok(ack)
            }
            Err(e) => {
                if let Some((started_at, previous)) = optimistic {
                    self.shared.store.rollback_start(started_at, previous);
                }
                Err(self.shared.request_failed("start processing", e))
            }
        }
    }

    /// Ask the backend to stop the current run. The state changes when
    /// the backend reports the outcome.
    ///
    /// Always sent: the local state may lag the backend, which answers
    /// the not-running case itself.
    pub async fn stop(&self) -> Result<StopAck, SyncError> {
        match self.shared.api.stop().await {
            Ok(ack) => {
                self.shared.clear_request_error();
                tracing::info!(message = %ack.message, "Stop acknowledged");
                Ok(ack)
            }
            Err(e) => Err(self.shared.request_failed("stop processing", e)),
        }
    }

    /// Back to `idle`, forgetting the current run.
    pub fn reset(&self) -> Outcome {
        lock(&self.shared.classifier).clear();
        self.shared.clear_request_error();
        self.shared.store.reset()
    }

    // ---- private helpers ----

    fn stop_driver(&self) -> Option<JoinHandle<()>> {
        let driver = lock(&self.driver).take();
        if let Some(driver) = &driver {
            driver.cancel.cancel();
        }

        {
            let mut fetches = lock(&self.shared.fetches);
            fetches.cancel();
            *fetches = self.cancel.child_token();
        }
        lock(&self.shared.outbound).take();
        self.shared.status.send_if_modified(|status| {
            let changed = *status != ConnectionStatus::Disconnected;
            *status = ConnectionStatus::Disconnected;
            changed
        });
        tracing::info!("Disconnected");

        driver.map(|driver| driver.handle)
    }
}

impl Drop for ProcessingSync {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Shared {
    /// Publish a status unless the owning task was cancelled, so a
    /// stopped task never overwrites a newer one.
    fn set_status(&self, next: ConnectionStatus, cancel: &CancellationToken) {
        let changed = self.status.send_if_modified(|status| {
            if cancel.is_cancelled() || *status == next {
                return false;
            }
            *status = next;
            true
        });
        if changed {
            tracing::debug!(status = %next, "Connection status changed");
        }
    }

    fn handle_frame(&self, text: &str) {
        match parse_event(text) {
            Ok(event) => {
                lock(&self.classifier).handle(&event);
                self.registry.dispatch(&event);
            }
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Dropping malformed frame");
            }
        }
    }

    fn request_failed(&self, action: &str, error: ApiError) -> SyncError {
        let message = error.to_string();
        tracing::error!(action, error = %message, "Backend request failed");
        *lock(&self.request_error) = Some(message.clone());
        self.bus
            .publish(Notification::request_failed(action, &message));
        SyncError::Api(error)
    }

    fn clear_request_error(&self) {
        lock(&self.request_error).take();
    }

    fn connection_failed(&self, error: &ClientError, cancel: &CancellationToken) {
        *lock(&self.connection_error) = Some(error.to_string());
        self.set_status(ConnectionStatus::Error, cancel);
    }
}

/// Core connection loop: connect -> session -> reconnect.
///
/// Runs until `cancel` fires or the reconnect budget is spent.
async fn run_connection_loop(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
) {
    let mut policy = ReconnectPolicy::new(&shared.config);

    loop {
        shared.set_status(ConnectionStatus::Connecting, &cancel);
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connector.connect() => result,
        };

        match connected {
            Ok(transport) => {
                policy.reset();
                shared.attempts.store(0, Ordering::Relaxed);
                lock(&shared.connection_error).take();
                shared.set_status(ConnectionStatus::Connected, &cancel);
                tracing::info!("Processing stream connected");
                lock(&shared.notifier).on_connected(&shared.bus);

                if let Err(e) = run_session(&shared, transport, &cancel).await {
                    tracing::warn!(error = %e, "Processing stream failed");
                    shared.connection_failed(&e, &cancel);
                }
            }
            Err(e) => {
                tracing::warn!(attempt = policy.attempts(), error = %e, "Connection failed");
                shared.connection_failed(&e, &cancel);
            }
        }
        shared.set_status(ConnectionStatus::Disconnected, &cancel);

        if cancel.is_cancelled() {
            return;
        }
        lock(&shared.notifier).on_lost(&shared.bus);

        let Some(delay) = policy.next_delay() else {
            tracing::error!(
                attempts = policy.attempts(),
                "Reconnect attempts exhausted, giving up",
            );
            lock(&shared.notifier).on_exhausted(&shared.bus, policy.attempts());
            return;
        };
        shared.attempts.store(policy.attempts(), Ordering::Relaxed);
        tracing::info!(
            attempt = policy.attempts(),
            max_attempts = policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting",
        );
        if !reconnect::wait(delay, &cancel).await {
            return;
        }
    }
}

/// Pump one open connection until it closes, fails, goes silent, or
/// `cancel` fires. `Ok` means a clean close.
async fn run_session(
    shared: &Arc<Shared>,
    mut transport: Box<dyn Transport>,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    let session = cancel.child_token();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *lock(&shared.outbound) = Some(tx.clone());

    if shared.config.snapshot_on_connect {
        spawn_snapshot(shared, session.clone());
    }

    let heartbeat_every = shared.config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let result = loop {
        tokio::select! {
            _ = session.cancelled() => break Ok(()),
            _ = heartbeat.tick() => {
                let silent = last_seen.elapsed();
                if silent >= heartbeat_every * 2 {
                    break Err(ClientError::Timeout(silent));
                }
                if let Err(e) = transport.send_text(HEARTBEAT.to_string()).await {
                    break Err(e);
                }
            }
            Some(text) = rx.recv() => {
                if let Err(e) = transport.send_text(text).await {
                    break Err(e);
                }
            }
            frame = transport.recv() => match frame {
                Some(Ok(text)) => {
                    last_seen = Instant::now();
                    shared.handle_frame(&text);
                }
                Some(Err(e)) => break Err(e),
                None => {
                    tracing::info!("Processing stream closed by server");
                    break Ok(());
                }
            },
        }
    };

    {
        let mut outbound = lock(&shared.outbound);
        if outbound.as_ref().is_some_and(|current| current.same_channel(&tx)) {
            *outbound = None;
        }
    }
    session.cancel();
    transport.close().await;
    result
}

/// Reconcile with the backend after a (re)connect. Cancelled with the
/// session.
fn spawn_snapshot(shared: &Arc<Shared>, cancel: CancellationToken) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Snapshot fetch cancelled");
            }
            result = shared.api.get_status() => match result {
                Ok(snapshot) => {
                    shared.store.load_snapshot(snapshot);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Snapshot fetch after connect failed");
                }
            },
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors returned by [`ProcessingSync`] requests.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The request was abandoned by [`ProcessingSync::disconnect`].
    #[error("Request cancelled")]
    Cancelled,
}
