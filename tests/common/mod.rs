//! Mock collaborators for the scenario tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use gatemq::{
    AckKind, AuthRequest, AuthVerdict, ConnectReturnCode, ConnectionError, ConnectionEvent,
    Credentials, DeviceConnection, DeviceDirectory, DeviceRecord, DeviceSession,
    FromDeviceContext, GatewayContext, InboundMessage, LastWill, MessageHandler, MetricsSink,
    Transport,
};
use gatemq::context::HandlerError;
use gatemq::directory::DirectoryError;

/// Scriptable connection recording everything the gateway does to it
pub struct TestConnection {
    client_id: String,
    credentials: Option<Credentials>,
    will: Option<LastWill>,
    connected: AtomicBool,
    accepted: AtomicBool,
    pub rejections: Mutex<Vec<ConnectReturnCode>>,
    pub acks: Mutex<Vec<(AckKind, u16)>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl TestConnection {
    pub fn new(client_id: &str) -> Self {
        let (events_tx, events_rx) = mpsc::channel(32);
        Self {
            client_id: client_id.to_string(),
            credentials: None,
            will: None,
            connected: AtomicBool::new(true),
            accepted: AtomicBool::new(false),
            rejections: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_will(mut self, will: LastWill) -> Self {
        self.will = Some(will);
        self
    }

    pub fn events(&self) -> mpsc::Sender<ConnectionEvent> {
        self.events_tx.clone()
    }

    pub fn last_rejection(&self) -> Option<ConnectReturnCode> {
        self.rejections.lock().last().copied()
    }

    pub fn was_accepted(&self) -> bool {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl DeviceConnection for TestConnection {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    fn will(&self) -> Option<&LastWill> {
        self.will.as_ref()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn accept(&self) -> Result<(), ConnectionError> {
        self.accepted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn reject(&self, code: ConnectReturnCode) {
        self.rejections.lock().push(code);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn publish_acknowledge(&self, message_id: u16) {
        self.acks.lock().push((AckKind::PubAck, message_id));
    }

    fn publish_received(&self, message_id: u16) {
        self.acks.lock().push((AckKind::PubRec, message_id));
    }

    fn take_events(&self) -> Result<mpsc::Receiver<ConnectionEvent>, ConnectionError> {
        self.events_rx
            .lock()
            .take()
            .ok_or(ConnectionError::AlreadyBound)
    }
}

/// Wraps a directory and counts calls into it
pub struct CountingDirectory<D> {
    inner: D,
    pub auth_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
}

impl<D> CountingDirectory<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            auth_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }

    pub fn auth_call_count(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_call_count(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<D: DeviceDirectory> DeviceDirectory for CountingDirectory<D> {
    async fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> Result<Option<AuthVerdict>, DirectoryError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.authenticate(request).await
    }

    async fn lookup(&self, device_id: &str) -> Result<Option<DeviceRecord>, DirectoryError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(device_id).await
    }
}

/// Directory whose authenticate never completes; parks the pipeline
#[derive(Default)]
pub struct HangingDirectory {
    pub started: AtomicUsize,
}

impl HangingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDirectory for HangingDirectory {
    async fn authenticate(
        &self,
        _request: &AuthRequest,
    ) -> Result<Option<AuthVerdict>, DirectoryError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn lookup(&self, _device_id: &str) -> Result<Option<DeviceRecord>, DirectoryError> {
        std::future::pending().await
    }
}

/// Context counting accepted sessions
#[derive(Default)]
pub struct CollectingContext {
    pub accepted: AtomicUsize,
}

impl CollectingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayContext for CollectingContext {
    async fn on_session_accepted(&self, _session: &Arc<DeviceSession>) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handler that accepts every message and keeps them
#[derive(Default)]
pub struct CollectingHandler {
    pub messages: Mutex<Vec<InboundMessage>>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl MessageHandler for CollectingHandler {
    async fn handle(
        &self,
        _session: &Arc<DeviceSession>,
        context: FromDeviceContext,
    ) -> Result<Option<bool>, HandlerError> {
        self.messages.lock().push(context.into_message());
        Ok(Some(true))
    }
}

/// Metrics sink counting events
#[derive(Default)]
pub struct CountingMetrics {
    pub new: AtomicUsize,
    pub rejected: AtomicUsize,
    pub accepted: AtomicUsize,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_count(&self) -> usize {
        self.new.load(Ordering::SeqCst)
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl MetricsSink for CountingMetrics {
    fn new_connection(&self, _transport: Transport) {
        self.new.fetch_add(1, Ordering::SeqCst);
    }

    fn rejected_connection(&self, _transport: Transport) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    fn accepted_connection(&self, _transport: Transport) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll until `predicate` holds or a deadline passes
pub async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..400 {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
