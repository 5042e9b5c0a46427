//! Session registry
//!
//! Holds the live `DeviceSession` per device identifier and enforces the
//! at-most-one-session invariant: registering an identifier that already
//! has a session retires the old one before installing the new one. The
//! registry provides its own synchronization; callers never coordinate
//! register/unregister across connections themselves.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::LimitsConfig;
use crate::protocol::Transport;
use crate::session::DeviceSession;


/// The session registry collaborator
pub trait SessionRegistry: Send + Sync {
    /// Install a session, retiring any session already registered for its
    /// device id. Returns the replaced session, if there was one.
    fn register(&self, session: Arc<DeviceSession>) -> Option<Arc<DeviceSession>>;

    /// Remove and retire the session for a device id
    fn unregister(&self, device_id: &str) -> Option<Arc<DeviceSession>>;

    fn get(&self, device_id: &str) -> Option<Arc<DeviceSession>>;

    /// Whether the transport has reached its configured session ceiling
    fn is_over_maximum(&self, transport: Transport) -> bool;

    /// Configured session ceiling for a transport (0 = unlimited)
    fn maximum_sessions(&self, transport: Transport) -> usize;
}

/// In-memory registry for single-process deployments
pub struct LocalSessionRegistry {
    sessions: DashMap<Arc<str>, Arc<DeviceSession>>,
    counts: DashMap<Transport, usize>,
    limits: LimitsConfig,
}

impl LocalSessionRegistry {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            counts: DashMap::new(),
            limits,
        }
    }

    /// Registry with no session ceilings
    pub fn unlimited() -> Self {
        Self::new(LimitsConfig::default())
    }

    pub fn count(&self, transport: Transport) -> usize {
        self.counts.get(&transport).map(|c| *c).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn adjust(&self, transport: Transport, delta: isize) {
        let mut count = self.counts.entry(transport).or_insert(0);
        *count = count.saturating_add_signed(delta);
    }
}

impl SessionRegistry for LocalSessionRegistry {
    fn register(&self, session: Arc<DeviceSession>) -> Option<Arc<DeviceSession>> {
        let transport = session.transport;
        let replaced = self
            .sessions
            .insert(session.device_id.clone(), session);

        match &replaced {
            Some(old) => {
                if old.transport != transport {
                    self.adjust(old.transport, -1);
                    self.adjust(transport, 1);
                }
                old.close();
            }
            None => self.adjust(transport, 1),
        }
        replaced
    }

    fn unregister(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        let (_, session) = self.sessions.remove(device_id)?;
        self.adjust(session.transport, -1);
        session.close();
        Some(session)
    }

    fn get(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.get(device_id).map(|s| s.clone())
    }

    fn is_over_maximum(&self, transport: Transport) -> bool {
        let maximum = self.maximum_sessions(transport);
        maximum != 0 && self.count(transport) >= maximum
    }

    fn maximum_sessions(&self, transport: Transport) -> usize {
        self.limits.maximum(transport)
    }
}
