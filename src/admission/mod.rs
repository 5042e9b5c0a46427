//! Connection admission queue
//!
//! Bounds the number of connections waiting to be admitted and sheds
//! load at the boundary: growth beyond capacity evicts the oldest entry,
//! and entries that waited past the admission timeout are refused with
//! "server unavailable" by a background sweeper. Release order is FIFO.
//!
//! The queue also owns the accepting counter: incremented on submit,
//! decremented either when an entry is shed or when the downstream
//! pipeline settles (completes or fails).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use crate::connection::DeviceConnection;
use crate::metrics::MetricsSink;
use crate::protocol::{ConnectReturnCode, Transport};


/// A connection waiting for admission
struct PendingConnection {
    connection: Arc<dyn DeviceConnection>,
    enqueued_at: Instant,
}

impl PendingConnection {
    fn new(connection: Arc<dyn DeviceConnection>) -> Self {
        Self {
            connection,
            enqueued_at: Instant::now(),
        }
    }

    fn deadline(&self, timeout: Duration) -> Instant {
        self.enqueued_at + timeout
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.enqueued_at.elapsed() >= timeout
    }
}

/// Bounded, time-limited buffer of raw incoming connections
pub struct AdmissionQueue {
    transport: Transport,
    capacity: usize,
    timeout: Duration,
    entries: Mutex<VecDeque<PendingConnection>>,
    /// Wakes the consumer in `acquire`
    ready: Notify,
    /// Wakes the timeout sweeper
    changed: Notify,
    accepting: AtomicUsize,
    closed: AtomicBool,
    monitor: Arc<dyn MetricsSink>,
}

impl AdmissionQueue {
    pub fn new(
        transport: Transport,
        capacity: usize,
        timeout: Duration,
        monitor: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            transport,
            capacity,
            timeout,
            entries: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            changed: Notify::new(),
            accepting: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            monitor,
        }
    }

    /// Connections currently inside the admission pipeline
    pub fn accepting(&self) -> usize {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueue a raw connection for admission
    pub fn submit(&self, connection: Arc<dyn DeviceConnection>) {
        let accepting = self.accepting.fetch_add(1, Ordering::SeqCst) + 1;
        self.monitor.new_connection(self.transport);
        self.monitor.accepting_changed(self.transport, accepting);

        if self.is_closed() {
            self.shed(PendingConnection::new(connection));
            return;
        }

        let shed = {
            let mut entries = self.entries.lock();
            let mut shed = Vec::new();
            while entries
                .front()
                .map_or(false, |p| p.is_expired(self.timeout))
            {
                shed.push(entries.pop_front().unwrap());
            }
            if entries.len() >= self.capacity {
                if let Some(oldest) = entries.pop_front() {
                    shed.push(oldest);
                }
            }
            entries.push_back(PendingConnection::new(connection));
            shed
        };

        for pending in shed {
            self.shed(pending);
        }
        // Lost race with close: nothing will drain the queue anymore
        if self.is_closed() {
            let drained: Vec<PendingConnection> =
                std::mem::take(&mut *self.entries.lock()).into_iter().collect();
            for pending in drained {
                self.shed(pending);
            }
            return;
        }
        self.ready.notify_one();
        self.changed.notify_one();
    }

    /// Dequeue the next admissible connection, FIFO. Entries found past
    /// their timeout are shed on the way. Returns `None` once closed.
    pub async fn acquire(&self) -> Option<Arc<dyn DeviceConnection>> {
        loop {
            if self.is_closed() {
                return None;
            }

            let (next, shed) = {
                let mut entries = self.entries.lock();
                let mut shed = Vec::new();
                let next = loop {
                    match entries.pop_front() {
                        Some(p) if p.is_expired(self.timeout) => shed.push(p),
                        other => break other,
                    }
                };
                (next, shed)
            };

            for pending in shed {
                self.shed(pending);
            }
            if let Some(pending) = next {
                return Some(pending.connection);
            }

            self.ready.notified().await;
        }
    }

    /// Shed entries past the admission timeout, waking at the earliest
    /// deadline. Runs until `close`; the timer fires independent of any
    /// connection activity.
    pub async fn run_sweeper(self: Arc<Self>) {
        loop {
            if self.is_closed() {
                return;
            }

            let deadline = {
                let entries = self.entries.lock();
                entries.front().map(|p| p.deadline(self.timeout))
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => self.evict_expired(),
                        _ = self.changed.notified() => {}
                    }
                }
                None => self.changed.notified().await,
            }
        }
    }

    fn evict_expired(&self) {
        let shed = {
            let mut entries = self.entries.lock();
            let mut shed = Vec::new();
            while entries
                .front()
                .map_or(false, |p| p.is_expired(self.timeout))
            {
                shed.push(entries.pop_front().unwrap());
            }
            shed
        };
        for pending in shed {
            self.shed(pending);
        }
    }

    /// Account a pipeline completion, successful or not
    pub fn settle(&self) {
        let accepting = self.accepting.fetch_sub(1, Ordering::SeqCst) - 1;
        self.monitor.accepted_connection(self.transport);
        self.monitor.accepting_changed(self.transport, accepting);
    }

    /// Refuse all queued entries and stop accepting new ones
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<PendingConnection> =
            std::mem::take(&mut *self.entries.lock()).into_iter().collect();
        for pending in drained {
            self.shed(pending);
        }
        self.ready.notify_waiters();
        self.changed.notify_waiters();
    }

    fn shed(&self, pending: PendingConnection) {
        let accepting = self.accepting.fetch_sub(1, Ordering::SeqCst) - 1;
        warn!(
            "rejecting client [{}], cannot handle more connections, current waiting clients: {}",
            pending.connection.client_id(),
            accepting
        );
        self.monitor.rejected_connection(self.transport);
        self.monitor.accepting_changed(self.transport, accepting);
        pending.connection.reject(ConnectReturnCode::ServerUnavailable);
    }
}
