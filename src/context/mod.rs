//! Downstream gateway collaborators
//!
//! After a session is bound, the gateway forwards protocol events to a
//! `GatewayContext` (presence tracking, in-flight message state,
//! provisioning) and hands inbound publishes to the `MessageHandler`
//! for protocol-adapter decoding. Both are implemented outside this
//! crate; defaults here are no-ops.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::connection::DeviceConnection;
use crate::protocol::{AckKind, InboundMessage, SubscribeRequest, UnsubscribeRequest};
use crate::session::DeviceSession;

/// Message handler error types
#[derive(Debug)]
pub enum HandlerError {
    /// Downstream processing failed
    Internal(String),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Internal(msg) => write!(f, "handler error: {}", msg),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Context handed to the message handler for one inbound device message
pub struct FromDeviceContext {
    session: Arc<DeviceSession>,
    message: InboundMessage,
}

impl FromDeviceContext {
    pub fn new(session: Arc<DeviceSession>, message: InboundMessage) -> Self {
        Self { session, message }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn message(&self) -> &InboundMessage {
        &self.message
    }

    pub fn into_message(self) -> InboundMessage {
        self.message
    }
}

/// Handles inbound device messages.
///
/// `Ok(Some(true))` acknowledges the message per its QoS; `Ok(None)`
/// means no protocol adapter could decode the payload.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        session: &Arc<DeviceSession>,
        context: FromDeviceContext,
    ) -> Result<Option<bool>, HandlerError>;
}

/// Single-shot handle resolving an unknown connection to a device id.
///
/// `resolve` consumes the handle, so it can be invoked at most once.
/// Dropping it without resolving completes the pending admission as a
/// no-op; the connection stays open but unbound.
pub struct DeviceResolver {
    tx: oneshot::Sender<String>,
}

impl DeviceResolver {
    pub(crate) fn new() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn resolve(self, device_id: impl Into<String>) {
        let _ = self.tx.send(device_id.into());
    }
}

/// A connection whose identity the directory could not resolve at
/// connect time, handed out for discovery/provisioning.
pub struct UnknownConnection {
    connection: Arc<dyn DeviceConnection>,
    resolver: DeviceResolver,
}

impl UnknownConnection {
    pub(crate) fn new(connection: Arc<dyn DeviceConnection>, resolver: DeviceResolver) -> Self {
        Self {
            connection,
            resolver,
        }
    }

    pub fn client_id(&self) -> &str {
        self.connection.client_id()
    }

    pub fn connection(&self) -> &Arc<dyn DeviceConnection> {
        &self.connection
    }

    /// Resolve to a device id, re-entering the admission pipeline
    pub fn resolve(self, device_id: impl Into<String>) {
        self.resolver.resolve(device_id);
    }

    pub fn into_parts(self) -> (Arc<dyn DeviceConnection>, DeviceResolver) {
        (self.connection, self.resolver)
    }
}

/// Gateway context collaborator.
///
/// All methods default to no-ops so implementations only override what
/// they track.
#[async_trait]
pub trait GatewayContext: Send + Sync {
    /// A session finished binding and is live
    async fn on_session_accepted(&self, _session: &Arc<DeviceSession>) {}

    async fn on_subscribe(&self, _session: &Arc<DeviceSession>, _request: SubscribeRequest) {}

    async fn on_unsubscribe(&self, _session: &Arc<DeviceSession>, _request: UnsubscribeRequest) {}

    /// QoS acknowledgment from the device, tagged with its kind.
    /// Ordering and retransmission semantics live behind this seam.
    async fn on_acknowledgment(
        &self,
        _session: &Arc<DeviceSession>,
        _kind: AckKind,
        _message_id: u16,
    ) {
    }

    /// A connection the directory does not know. Resolving the handle
    /// re-enters admission with the resolved device id; dropping it
    /// leaves the connection open but unbound.
    async fn on_unknown_connection(&self, _connection: UnknownConnection) {}
}

/// Context implementation that ignores everything
pub struct DefaultContext;

#[async_trait]
impl GatewayContext for DefaultContext {}

impl Default for DefaultContext {
    fn default() -> Self {
        Self
    }
}
