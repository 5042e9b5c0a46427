//! Gateway-facing protocol types
//!
//! Already-parsed value shapes exchanged between the wire transport, the
//! admission pipeline and the downstream collaborators. Packet framing
//! itself is the transport's job and never enters this crate.

use std::fmt;

use bytes::Bytes;

/// Transport a device connection arrived over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// MQTT over plain TCP
    Mqtt,
    /// MQTT over TLS
    Mqtts,
}

impl Transport {
    /// Stable identifier used in metrics labels and config keys
    pub fn id(&self) -> &'static str {
        match self {
            Transport::Mqtt => "mqtt",
            Transport::Mqtts => "mqtts",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "mqtt" => Some(Transport::Mqtt),
            "mqtts" => Some(Transport::Mqtts),
            _ => None,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// CONNECT return codes the gateway answers admission with (MQTT v3.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    /// Overloaded, shedding, or an internal failure was downgraded
    ServerUnavailable = 3,
    /// Credentials were present but wrong
    BadUserNameOrPassword = 4,
    /// No credentials supplied
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Acknowledgment kinds in the QoS 1/2 handshakes.
///
/// Each inbound acknowledgment is forwarded tagged with its own kind;
/// PUBREL is its own kind and never folded into PUBREC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    /// QoS 1 publish acknowledged
    PubAck,
    /// QoS 2 publish received
    PubRec,
    /// QoS 2 release
    PubRel,
    /// QoS 2 handshake complete
    PubComp,
}

impl AckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckKind::PubAck => "puback",
            AckKind::PubRec => "pubrec",
            AckKind::PubRel => "pubrel",
            AckKind::PubComp => "pubcomp",
        }
    }
}

impl fmt::Display for AckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-will declared by a client at connect time
#[derive(Debug, Clone)]
pub struct LastWill {
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
    pub retain: bool,
}

/// A publish-shaped message travelling from a device into the platform.
///
/// `message_id: None` is the "no message id" marker: MQTT packet ids are
/// 1..=65535, so `None` can never collide with a real id. Synthesized
/// will messages always carry `None` and are never acknowledged.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
    pub message_id: Option<u16>,
    pub dup: bool,
    pub retain: bool,
    pub is_will: bool,
}

impl InboundMessage {
    /// Synthesize the inbound publish for a declared last-will
    pub fn from_will(will: &LastWill) -> Self {
        Self {
            topic: will.topic.clone(),
            qos: will.qos,
            payload: will.payload.clone(),
            message_id: None,
            dup: false,
            retain: false,
            is_will: true,
        }
    }
}

/// One topic filter inside a SUBSCRIBE request
#[derive(Debug, Clone)]
pub struct TopicSubscription {
    pub filter: String,
    pub qos: QoS,
}

/// SUBSCRIBE request as parsed off the wire
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub message_id: u16,
    pub subscriptions: Vec<TopicSubscription>,
}

/// UNSUBSCRIBE request as parsed off the wire
#[derive(Debug, Clone)]
pub struct UnsubscribeRequest {
    pub message_id: u16,
    pub filters: Vec<String>,
}
