//! Raw device connection boundary
//!
//! The transport layer hands the gateway already-parsed connection
//! objects. `DeviceConnection` is the seam: the core reads the declared
//! identity, commands reject/close, sends QoS acknowledgments back to
//! the wire, and consumes the connection's ordered event stream exactly
//! once when the session is bound.

use std::fmt;

use tokio::sync::mpsc;

use crate::protocol::{
    AckKind, ConnectReturnCode, InboundMessage, LastWill, SubscribeRequest, UnsubscribeRequest,
};

/// Credentials declared in the CONNECT packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Events a bound connection delivers, in wire arrival order
#[derive(Debug)]
pub enum ConnectionEvent {
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Publish(InboundMessage),
    /// PUBACK / PUBREC / PUBREL / PUBCOMP from the device
    Ack { kind: AckKind, message_id: u16 },
    /// Clean DISCONNECT from the client
    Disconnect,
    /// Protocol-level error on the wire
    ProtocolError(String),
    /// Transport dropped without a DISCONNECT
    Closed,
}

/// Connection error types
#[derive(Debug)]
pub enum ConnectionError {
    /// The endpoint is no longer connected
    Closed,
    /// The event stream was already taken or CONNACK already answered
    AlreadyBound,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Closed => write!(f, "connection closed"),
            ConnectionError::AlreadyBound => write!(f, "connection already bound"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// A not-yet-bound network endpoint, owned by the transport.
///
/// The core only reacts to its events and commands it to accept, reject
/// or close; implementations are responsible for encoding those commands
/// onto the wire.
pub trait DeviceConnection: Send + Sync {
    /// Client identifier claimed in the CONNECT packet
    fn client_id(&self) -> &str;

    /// Credentials declared at connect time, if any
    fn credentials(&self) -> Option<&Credentials>;

    /// Last-will declared at connect time, if any
    fn will(&self) -> Option<&LastWill>;

    fn is_connected(&self) -> bool;

    /// Complete the CONNECT handshake (CONNACK accepted)
    fn accept(&self) -> Result<(), ConnectionError>;

    /// Refuse the CONNECT handshake with the given return code
    fn reject(&self, code: ConnectReturnCode);

    /// Close the transport
    fn close(&self);

    /// PUBACK for an inbound QoS 1 publish
    fn publish_acknowledge(&self, message_id: u16);

    /// PUBREC for an inbound QoS 2 publish
    fn publish_received(&self, message_id: u16);

    /// Take the connection's ordered event stream. Succeeds at most once
    /// per connection; a second call reports `AlreadyBound`.
    fn take_events(&self) -> Result<mpsc::Receiver<ConnectionEvent>, ConnectionError>;
}
