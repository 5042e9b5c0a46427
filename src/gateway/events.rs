//! Connection event routing
//!
//! One task per bound session consumes the connection's ordered event
//! stream, so no two events for the same connection are ever processed
//! in parallel. Disconnect, protocol exception and transport close all
//! converge on the same close routine; the two abnormal paths synthesize
//! the declared last-will first.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::connection::ConnectionEvent;
use crate::context::FromDeviceContext;
use crate::protocol::{InboundMessage, QoS};
use crate::session::DeviceSession;

use super::GatewayServer;

impl GatewayServer {
    pub(super) async fn route_events(
        self: Arc<Self>,
        session: Arc<DeviceSession>,
        mut events: mpsc::Receiver<ConnectionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Subscribe(request) => {
                    self.context.on_subscribe(&session, request).await;
                }
                ConnectionEvent::Unsubscribe(request) => {
                    self.context.on_unsubscribe(&session, request).await;
                }
                ConnectionEvent::Ack { kind, message_id } => {
                    self.context
                        .on_acknowledgment(&session, kind, message_id)
                        .await;
                }
                ConnectionEvent::Publish(message) => {
                    self.handle_message(&session, message).await;
                }
                ConnectionEvent::Disconnect => {
                    debug!("mqtt client [{}] disconnected", session.device_id);
                    self.close_endpoint(&session);
                    break;
                }
                ConnectionEvent::ProtocolError(err) => {
                    debug!("mqtt client [{}] connection error: {}", session.device_id, err);
                    self.dispatch_will(&session).await;
                    self.close_endpoint(&session);
                    break;
                }
                ConnectionEvent::Closed => {
                    self.dispatch_will(&session).await;
                    self.close_endpoint(&session);
                    break;
                }
            }
        }
    }

    /// Feed an inbound publish (or synthesized will) through the message
    /// handler, acknowledging per QoS when it reports success.
    pub(super) async fn handle_message(&self, session: &Arc<DeviceSession>, message: InboundMessage) {
        session.ping();
        debug!("receive device [{}] message => {:?}", session.device_id, message);

        let qos = message.qos;
        let message_id = message.message_id;
        let context = FromDeviceContext::new(session.clone(), message);

        match self.handler.handle(session, context).await {
            Ok(Some(true)) => {
                if let Some(id) = message_id {
                    match qos {
                        QoS::AtLeastOnce => session.connection().publish_acknowledge(id),
                        QoS::ExactlyOnce => session.connection().publish_received(id),
                        QoS::AtMostOnce => {}
                    }
                }
            }
            Ok(Some(false)) => {}
            Ok(None) => {
                error!("cannot decode device [{}] message", session.device_id);
            }
            Err(err) => {
                error!("handle device [{}] message error: {}", session.device_id, err);
            }
        }
    }

    /// Abnormal teardown: route the declared will through the normal
    /// publish path, exactly once, before the session goes away.
    async fn dispatch_will(&self, session: &Arc<DeviceSession>) {
        let will = session.connection().will().map(InboundMessage::from_will);
        if let Some(message) = will {
            self.handle_message(session, message).await;
        }
    }
}
