//! In-memory fakes for the transport and REST seams.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use briefing_core::JobState;
use briefing_realtime::api::{ApiError, StartAck, StartOptions, StatusApi, StopAck};
use briefing_realtime::client::{ClientError, Connector, Transport};
use briefing_realtime::messages::InboundEvent;
use briefing_realtime::{ProcessingSync, SyncConfig};
use tokio::sync::mpsc;

/// Upper bound on how long a test waits for something to happen. Time
/// is paused in these tests, so this is virtual time.
pub const SETTLE: Duration = Duration::from_secs(600);

pub fn test_config() -> SyncConfig {
    SyncConfig {
        reconnect_interval: Duration::from_secs(3),
        max_reconnect_attempts: 5,
        heartbeat_interval: Duration::from_secs(30),
        snapshot_on_connect: false,
        ..Default::default()
    }
}

/// Await `fut`, failing the test if it does not finish within [`SETTLE`].
pub async fn settle<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(SETTLE, fut)
        .await
        .expect("timed out waiting for condition")
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy)]
pub enum Attempt {
    Fail,
    /// Open a transport. With `auto_pong` the fake answers every
    /// heartbeat itself.
    Open { auto_pong: bool },
}

impl Attempt {
    pub const OPEN: Attempt = Attempt::Open { auto_pong: true };
}

/// Test-side end of one fake connection.
pub struct ServerEnd {
    to_client: Option<mpsc::UnboundedSender<Result<String, ClientError>>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl ServerEnd {
    pub fn push(&self, frame: &str) {
        if let Some(tx) = &self.to_client {
            tx.send(Ok(frame.to_string())).expect("client transport gone");
        }
    }

    pub fn push_error(&self, message: &str) {
        if let Some(tx) = &self.to_client {
            tx.send(Err(ClientError::Protocol(message.into())))
                .expect("client transport gone");
        }
    }

    /// Close from the server side.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Next frame the client sent, skipping heartbeats. `None` once the
    /// client side is gone.
    pub async fn next_sent(&mut self) -> Option<String> {
        loop {
            let frame = self.from_client.recv().await?;
            if frame != "ping" {
                return Some(frame);
            }
        }
    }

    /// Next frame the client sent, heartbeats included, without waiting.
    pub fn try_next_raw(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Whether the client closed the transport.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeTransport {
    inbound: mpsc::UnboundedReceiver<Result<String, ClientError>>,
    outbound: mpsc::UnboundedSender<String>,
    pending: VecDeque<String>,
    auto_pong: bool,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        if self.auto_pong && text == "ping" {
            self.pending.push_back(r#"{"type":"pong"}"#.to_string());
        }
        // The test may have dropped its end; that is not an error here.
        let _ = self.outbound.send(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        if let Some(frame) = self.pending.pop_front() {
            return Some(Ok(frame));
        }
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector that follows a script of attempts, then fails forever.
pub struct FakeConnector {
    script: Mutex<VecDeque<Attempt>>,
    calls: AtomicUsize,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeConnector {
    pub fn new(script: &[Attempt]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(script.iter().copied().collect()),
            calls: AtomicUsize::new(0),
            servers,
        };
        (Arc::new(connector), rx)
    }

    /// Append attempts to the script.
    pub fn then(&self, attempts: &[Attempt]) {
        self.script.lock().unwrap().extend(attempts.iter().copied());
    }

    /// Connection attempts made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Fail);

        match next {
            Attempt::Fail => Err(ClientError::Connection("connection refused".into())),
            Attempt::Open { auto_pong } => {
                let (to_client, inbound) = mpsc::unbounded_channel();
                let (outbound, from_client) = mpsc::unbounded_channel();
                let closed = Arc::new(AtomicBool::new(false));
                let _ = self.servers.send(ServerEnd {
                    to_client: Some(to_client),
                    from_client,
                    closed: Arc::clone(&closed),
                });
                Ok(Box::new(FakeTransport {
                    inbound,
                    outbound,
                    pending: VecDeque::new(),
                    auto_pong,
                    closed,
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// REST collaborator
// ---------------------------------------------------------------------------

fn unavailable() -> ApiError {
    ApiError::ApiError {
        status: 503,
        body: "backend unavailable".into(),
    }
}

/// Canned REST answers. `None` answers fail with a 503.
#[derive(Default)]
pub struct FakeApi {
    pub status: Mutex<Option<JobState>>,
    pub start: Mutex<Option<StartAck>>,
    pub stop: Mutex<Option<StopAck>>,
    /// Delay before answering `get_status`.
    pub status_delay: Mutex<Option<Duration>>,
    pub status_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
}

impl FakeApi {
    pub fn with_status(state: JobState) -> Arc<Self> {
        let api = Self::default();
        *api.status.lock().unwrap() = Some(state);
        Arc::new(api)
    }
}

#[async_trait]
impl StatusApi for FakeApi {
    async fn get_status(&self) -> Result<JobState, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.status.lock().unwrap().clone().ok_or_else(unavailable)
    }

    async fn start(&self, _options: &StartOptions) -> Result<StartAck, ApiError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.start.lock().unwrap().clone().ok_or_else(unavailable)
    }

    async fn stop(&self) -> Result<StopAck, ApiError> {
        self.stop.lock().unwrap().clone().ok_or_else(unavailable)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub sync: ProcessingSync,
    pub connector: Arc<FakeConnector>,
    pub servers: mpsc::UnboundedReceiver<ServerEnd>,
    pub api: Arc<FakeApi>,
}

impl Harness {
    pub fn new(config: SyncConfig, script: &[Attempt], api: Arc<FakeApi>) -> Self {
        let (connector, servers) = FakeConnector::new(script);
        let sync = ProcessingSync::new(config, connector.clone(), api.clone()).unwrap();
        Self {
            sync,
            connector,
            servers,
            api,
        }
    }

    /// Connect and wait for the first server end.
    pub async fn connected(config: SyncConfig, api: Arc<FakeApi>) -> (Self, ServerEnd) {
        let mut harness = Self::new(config, &[Attempt::OPEN], api);
        harness.sync.connect();
        let server = settle(harness.servers.recv())
            .await
            .expect("connector dropped");
        (harness, server)
    }

    /// Forward every event the sync dispatches into a channel.
    pub fn record_events(&self) -> mpsc::UnboundedReceiver<InboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sync.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }
}

/// Receive exactly `n` events.
pub async fn take_events(
    rx: &mut mpsc::UnboundedReceiver<InboundEvent>,
    n: usize,
) -> Vec<InboundEvent> {
    let mut events = Vec::with_capacity(n);
    for _ in 0..n {
        events.push(settle(rx.recv()).await.expect("event channel closed"));
    }
    events
}
