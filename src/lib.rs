//! GateMQ - connection admission and session core for an IoT MQTT gateway
//!
//! Decides whether an incoming device connection may be accepted,
//! authenticates it against a device directory, binds the connection to a
//! logical device session and routes protocol events (subscribe,
//! acknowledgments, publishes, disconnects, last-will) to that session
//! for the remainder of its life.
//!
//! The MQTT wire codec, TCP/TLS transport, protocol-payload decoding and
//! durable session storage are collaborator seams
//! ([`connection::DeviceConnection`], [`directory::DeviceDirectory`],
//! [`context::MessageHandler`], [`registry::SessionRegistry`]), not part
//! of this crate.

pub mod admission;
pub mod config;
pub mod connection;
pub mod context;
pub mod directory;
pub mod gateway;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod test_util;

pub use admission::AdmissionQueue;
pub use config::{AdmissionConfig, GatewayConfig, LimitsConfig};
pub use connection::{ConnectionError, ConnectionEvent, Credentials, DeviceConnection};
pub use context::{
    DefaultContext, DeviceResolver, FromDeviceContext, GatewayContext, MessageHandler,
    UnknownConnection,
};
pub use directory::{AuthRequest, AuthVerdict, DeviceDirectory, DeviceRecord, StaticDirectory};
pub use gateway::{AcceptError, GatewayServer};
pub use metrics::{GatewayMetrics, MetricsServer, MetricsSink, NoopMetrics};
pub use protocol::{
    AckKind, ConnectReturnCode, InboundMessage, LastWill, QoS, SubscribeRequest, Transport,
    UnsubscribeRequest,
};
pub use registry::{LocalSessionRegistry, SessionRegistry};
pub use session::DeviceSession;
