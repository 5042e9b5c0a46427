//! Device sessions
//!
//! A `DeviceSession` binds one network connection to one logical device
//! for the lifetime of the connection. It is created exactly once per
//! successful admission and retired by the session registry on
//! disconnect, replacement or explicit close.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::connection::DeviceConnection;
use crate::protocol::Transport;

/// A live, registered device session
pub struct DeviceSession {
    /// Resolved device identifier
    pub device_id: Arc<str>,
    /// Transport the bound connection arrived over
    pub transport: Transport,
    connection: Arc<dyn DeviceConnection>,
    last_activity: Mutex<Instant>,
    connected_at: Instant,
    alive: AtomicBool,
}

impl DeviceSession {
    pub fn new(
        device_id: impl Into<Arc<str>>,
        transport: Transport,
        connection: Arc<dyn DeviceConnection>,
    ) -> Self {
        let now = Instant::now();
        Self {
            device_id: device_id.into(),
            transport,
            connection,
            last_activity: Mutex::new(now),
            connected_at: now,
            alive: AtomicBool::new(true),
        }
    }

    pub fn connection(&self) -> &Arc<dyn DeviceConnection> {
        &self.connection
    }

    /// Keep-alive refresh; called for every inbound message
    pub fn ping(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.connection.is_connected()
    }

    /// Mark the session dead and close the connection if still open.
    /// Idempotent; replacement and unregistration both land here.
    pub fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) && self.connection.is_connected() {
            self.connection.close();
        }
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id)
            .field("transport", &self.transport)
            .field("alive", &self.alive.load(Ordering::SeqCst))
            .finish()
    }
}
