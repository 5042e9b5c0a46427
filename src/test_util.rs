//! Test doubles shared by the unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connection::{ConnectionError, ConnectionEvent, Credentials, DeviceConnection};
use crate::context::{
    FromDeviceContext, GatewayContext, HandlerError, MessageHandler, UnknownConnection,
};
use crate::directory::{AuthRequest, AuthVerdict, DeviceDirectory, DeviceRecord, DirectoryError};
use crate::metrics::MetricsSink;
use crate::protocol::{
    AckKind, ConnectReturnCode, InboundMessage, LastWill, SubscribeRequest, Transport,
    UnsubscribeRequest,
};
use crate::session::DeviceSession;

/// Scriptable `DeviceConnection` recording every command it receives
pub struct MockConnection {
    client_id: String,
    credentials: Option<Credentials>,
    will: Option<LastWill>,
    connected: AtomicBool,
    accepted: AtomicBool,
    accept_fails: bool,
    pub rejections: Mutex<Vec<ConnectReturnCode>>,
    pub acks: Mutex<Vec<(AckKind, u16)>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl MockConnection {
    pub fn new(client_id: &str) -> Self {
        let (events_tx, events_rx) = mpsc::channel(32);
        Self {
            client_id: client_id.to_string(),
            credentials: None,
            will: None,
            connected: AtomicBool::new(true),
            accepted: AtomicBool::new(false),
            accept_fails: false,
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

    /// Make `accept` fail, to exercise handler-wiring errors
    pub fn failing_accept(mut self) -> Self {
        self.accept_fails = true;
        self
    }

    /// Sender feeding the connection's event stream
    pub fn events(&self) -> mpsc::Sender<ConnectionEvent> {
        self.events_tx.clone()
    }

    pub fn last_rejection(&self) -> Option<ConnectReturnCode> {
        self.rejections.lock().last().copied()
    }

    pub fn rejection_count(&self) -> usize {
        self.rejections.lock().len()
    }

    pub fn was_accepted(&self) -> bool {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl DeviceConnection for MockConnection {
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
        if self.accept_fails {
            return Err(ConnectionError::Closed);
        }
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

/// Scripted outcome of one directory authentication
pub enum AuthScript {
    Verdict(AuthVerdict),
    Unknown,
    Fail(String),
}

/// In-memory `DeviceDirectory` with scriptable verdicts and call counting
#[derive(Default)]
pub struct MockDirectory {
    scripts: Mutex<HashMap<String, AuthScript>>,
    records: Mutex<HashMap<String, DeviceRecord>>,
    pub auth_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device that authenticates successfully and resolves
    pub fn with_device(self, client_id: &str, device_id: Option<&str>) -> Self {
        let resolved = device_id.unwrap_or(client_id).to_string();
        self.scripts.lock().insert(
            client_id.to_string(),
            AuthScript::Verdict(AuthVerdict::ok(device_id.map(str::to_string))),
        );
        self.records.lock().insert(
            resolved.clone(),
            DeviceRecord {
                id: resolved,
                name: None,
            },
        );
        self
    }

    pub fn with_script(self, client_id: &str, script: AuthScript) -> Self {
        self.scripts.lock().insert(client_id.to_string(), script);
        self
    }

    /// Provision a record after construction (deferred-resolution tests)
    pub fn add_record(&self, device_id: &str) {
        self.records.lock().insert(
            device_id.to_string(),
            DeviceRecord {
                id: device_id.to_string(),
                name: None,
            },
        );
    }

    pub fn auth_call_count(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_call_count(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDirectory for MockDirectory {
    async fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> Result<Option<AuthVerdict>, DirectoryError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().get(&request.client_id) {
            Some(AuthScript::Verdict(verdict)) => Ok(Some(verdict.clone())),
            Some(AuthScript::Unknown) | None => Ok(None),
            Some(AuthScript::Fail(msg)) => Err(DirectoryError::Unavailable(msg.clone())),
        }
    }

    async fn lookup(&self, device_id: &str) -> Result<Option<DeviceRecord>, DirectoryError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.lock().get(device_id).cloned())
    }
}

/// Everything a `RecordingContext` saw, in order
#[derive(Debug)]
pub enum ContextCall {
    Accepted(String),
    Subscribe(String, SubscribeRequest),
    Unsubscribe(String, UnsubscribeRequest),
    Ack(String, AckKind, u16),
}

/// `GatewayContext` recording calls; unknown connections are parked for
/// the test to resolve or drop
#[derive(Default)]
pub struct RecordingContext {
    pub calls: Mutex<Vec<ContextCall>>,
    pub unknown: Mutex<Vec<UnknownConnection>>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted_devices().len()
    }

    pub fn accepted_devices(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ContextCall::Accepted(device_id) => Some(device_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> Vec<(AckKind, u16)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ContextCall::Ack(_, kind, id) => Some((*kind, *id)),
                _ => None,
            })
            .collect()
    }

    pub fn take_unknown(&self) -> Option<UnknownConnection> {
        self.unknown.lock().pop()
    }
}

#[async_trait]
impl GatewayContext for RecordingContext {
    async fn on_session_accepted(&self, session: &Arc<DeviceSession>) {
        self.calls
            .lock()
            .push(ContextCall::Accepted(session.device_id.to_string()));
    }

    async fn on_subscribe(&self, session: &Arc<DeviceSession>, request: SubscribeRequest) {
        self.calls
            .lock()
            .push(ContextCall::Subscribe(session.device_id.to_string(), request));
    }

    async fn on_unsubscribe(&self, session: &Arc<DeviceSession>, request: UnsubscribeRequest) {
        self.calls.lock().push(ContextCall::Unsubscribe(
            session.device_id.to_string(),
            request,
        ));
    }

    async fn on_acknowledgment(
        &self,
        session: &Arc<DeviceSession>,
        kind: AckKind,
        message_id: u16,
    ) {
        self.calls.lock().push(ContextCall::Ack(
            session.device_id.to_string(),
            kind,
            message_id,
        ));
    }

    async fn on_unknown_connection(&self, connection: UnknownConnection) {
        self.unknown.lock().push(connection);
    }
}

/// `MessageHandler` answering a fixed result and recording messages
pub struct RecordingHandler {
    result: Result<Option<bool>, String>,
    pub messages: Mutex<Vec<InboundMessage>>,
}

impl RecordingHandler {
    pub fn accepting() -> Self {
        Self {
            result: Ok(Some(true)),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing() -> Self {
        Self {
            result: Ok(Some(false)),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn undecodable() -> Self {
        Self {
            result: Ok(None),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            result: Err(msg.to_string()),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(
        &self,
        _session: &Arc<DeviceSession>,
        context: FromDeviceContext,
    ) -> Result<Option<bool>, HandlerError> {
        self.messages.lock().push(context.into_message());
        match &self.result {
            Ok(result) => Ok(*result),
            Err(msg) => Err(HandlerError::Internal(msg.clone())),
        }
    }
}

/// `MetricsSink` counting every event
#[derive(Default)]
pub struct RecordingMetrics {
    pub new: AtomicUsize,
    pub rejected: AtomicUsize,
    pub accepted: AtomicUsize,
}

impl RecordingMetrics {
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

impl MetricsSink for RecordingMetrics {
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

/// Poll until `predicate` holds or the deadline passes
pub async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
