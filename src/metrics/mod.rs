//! Admission metrics
//!
//! The gateway reports every stage transition of the admission pipeline
//! to a `MetricsSink`. `GatewayMetrics` is the Prometheus-backed sink;
//! `MetricsServer` exposes it over HTTP for scraping.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::protocol::Transport;

mod server;

pub use server::MetricsServer;

/// Receives admission stage transitions, labelled by transport
pub trait MetricsSink: Send + Sync {
    /// A raw connection entered the admission queue
    fn new_connection(&self, transport: Transport);

    /// A connection was refused (shed, overloaded, or bad credentials)
    fn rejected_connection(&self, transport: Transport);

    /// A connection's admission pipeline completed (or failed past the queue)
    fn accepted_connection(&self, transport: Transport);

    /// Snapshot of the accepting counter after it changed
    fn accepting_changed(&self, _transport: Transport, _accepting: usize) {}
}

/// Sink that records nothing
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn new_connection(&self, _transport: Transport) {}
    fn rejected_connection(&self, _transport: Transport) {}
    fn accepted_connection(&self, _transport: Transport) {}
}

/// Prometheus-backed metrics sink
#[derive(Clone)]
pub struct GatewayMetrics {
    pub registry: Registry,

    pub connections_new_total: IntCounterVec,
    pub connections_rejected_total: IntCounterVec,
    pub connections_accepted_total: IntCounterVec,
    /// Connections currently inside the admission pipeline
    pub connections_accepting: IntGaugeVec,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_new_total = IntCounterVec::new(
            Opts::new(
                "gatemq_connections_new_total",
                "Connections submitted for admission since startup",
            ),
            &["transport"],
        )
        .unwrap();

        let connections_rejected_total = IntCounterVec::new(
            Opts::new(
                "gatemq_connections_rejected_total",
                "Connections refused by admission since startup",
            ),
            &["transport"],
        )
        .unwrap();

        let connections_accepted_total = IntCounterVec::new(
            Opts::new(
                "gatemq_connections_accepted_total",
                "Admission pipelines completed since startup",
            ),
            &["transport"],
        )
        .unwrap();

        let connections_accepting = IntGaugeVec::new(
            Opts::new(
                "gatemq_connections_accepting",
                "Connections currently inside the admission pipeline",
            ),
            &["transport"],
        )
        .unwrap();

        registry
            .register(Box::new(connections_new_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_rejected_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_accepted_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_accepting.clone()))
            .unwrap();

        Self {
            registry,
            connections_new_total,
            connections_rejected_total,
            connections_accepted_total,
            connections_accepting,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for GatewayMetrics {
    fn new_connection(&self, transport: Transport) {
        self.connections_new_total
            .with_label_values(&[transport.id()])
            .inc();
    }

    fn rejected_connection(&self, transport: Transport) {
        self.connections_rejected_total
            .with_label_values(&[transport.id()])
            .inc();
    }

    fn accepted_connection(&self, transport: Transport) {
        self.connections_accepted_total
            .with_label_values(&[transport.id()])
            .inc();
    }

    fn accepting_changed(&self, transport: Transport, accepting: usize) {
        self.connections_accepting
            .with_label_values(&[transport.id()])
            .set(accepting as i64);
    }
}
