//! Session binding
//!
//! Registering -> Bound -> Closed. Registration trusts the registry's
//! at-most-one-session invariant; a wiring failure unwinds both the
//! registration and the connection before propagating.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::connection::{ConnectionError, ConnectionEvent};
use crate::session::DeviceSession;

use super::{AcceptError, GatewayServer};

impl GatewayServer {
    /// Register the session, attach the event route and announce it.
    pub(super) async fn bind(
        self: Arc<Self>,
        session: Arc<DeviceSession>,
    ) -> Result<Arc<DeviceSession>, AcceptError> {
        let device_id = session.device_id.clone();

        // Replacement of an existing session for this id happens inside
        // the registry; the old session is retired before ours goes in.
        if self.registry.register(session.clone()).is_some() {
            debug!("client [{}] replaced an existing session", device_id);
        }
        debug!("mqtt client [{}] connected", device_id);

        let events = match self.wire(&session) {
            Ok(events) => events,
            Err(err) => {
                error!("failed to bind mqtt client [{}]: {}", device_id, err);
                self.close_endpoint(&session);
                session.close();
                return Err(err.into());
            }
        };

        let gateway = self.clone();
        let routed = session.clone();
        tokio::spawn(async move { gateway.route_events(routed, events).await });

        self.context.on_session_accepted(&session).await;
        Ok(session)
    }

    /// Take the event stream and answer the CONNECT
    fn wire(
        &self,
        session: &DeviceSession,
    ) -> Result<mpsc::Receiver<ConnectionEvent>, ConnectionError> {
        let events = session.connection().take_events()?;
        session.connection().accept()?;
        Ok(events)
    }

    /// Converged close routine for disconnect, protocol error and
    /// transport close. Only this session's own registration is removed;
    /// when the registry holds a different session for the id (this one
    /// was replaced) or none at all, the socket is force-closed instead
    /// so nothing is orphaned.
    pub(super) fn close_endpoint(&self, session: &Arc<DeviceSession>) {
        debug!("closing mqtt client [{}]", session.device_id);
        let removed = match self.registry.get(&session.device_id) {
            Some(ref live) if Arc::ptr_eq(live, session) => {
                self.registry.unregister(&session.device_id)
            }
            _ => None,
        };
        if removed.is_none() {
            session.close();
        }
    }
}
