//! Gateway server core
//!
//! Ties the admission queue, device directory, session registry and
//! downstream collaborators into the per-connection admission pipeline:
//!
//! raw connection -> admission queue -> authentication -> session
//! binding -> event routing, with the metrics sink observing each stage
//! transition.
//!
//! Each connection's pipeline runs as its own task; a slow directory
//! holds up that one connection without affecting others. The admission
//! timeout covers only the queuing stage.

mod bind;
mod events;


use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::admission::AdmissionQueue;
use crate::config::AdmissionConfig;
use crate::connection::{ConnectionError, DeviceConnection};
use crate::context::{DeviceResolver, GatewayContext, MessageHandler, UnknownConnection};
use crate::directory::{AuthRequest, DeviceDirectory};
use crate::metrics::MetricsSink;
use crate::protocol::{ConnectReturnCode, Transport};
use crate::registry::SessionRegistry;
use crate::session::DeviceSession;

/// Errors that escape a single connection's admission pipeline.
///
/// Everything else (overload, bad credentials, directory trouble) is
/// handled in place with a protocol-level reject and never propagates.
#[derive(Debug)]
pub enum AcceptError {
    /// Attaching the bound-state handlers failed
    Wiring(ConnectionError),
}

impl fmt::Display for AcceptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptError::Wiring(e) => write!(f, "handler wiring failed: {}", e),
        }
    }
}

impl std::error::Error for AcceptError {}

impl From<ConnectionError> for AcceptError {
    fn from(e: ConnectionError) -> Self {
        AcceptError::Wiring(e)
    }
}

/// The MQTT gateway admission and session core
pub struct GatewayServer {
    transport: Transport,
    queue: Arc<AdmissionQueue>,
    directory: Arc<dyn DeviceDirectory>,
    registry: Arc<dyn SessionRegistry>,
    context: Arc<dyn GatewayContext>,
    handler: Arc<dyn MessageHandler>,
    monitor: Arc<dyn MetricsSink>,
    permits: Arc<Semaphore>,
}

impl GatewayServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Transport,
        admission: AdmissionConfig,
        directory: Arc<dyn DeviceDirectory>,
        registry: Arc<dyn SessionRegistry>,
        context: Arc<dyn GatewayContext>,
        handler: Arc<dyn MessageHandler>,
        monitor: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        let queue = Arc::new(AdmissionQueue::new(
            transport,
            admission.max_queue_size,
            admission.timeout,
            monitor.clone(),
        ));
        Arc::new(Self {
            transport,
            queue,
            directory,
            registry,
            context,
            handler,
            monitor,
            permits: Arc::new(Semaphore::new(admission.max_inflight)),
        })
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Connections currently inside the admission pipeline
    pub fn accepting(&self) -> usize {
        self.queue.accepting()
    }

    /// Entry point for the transport frontend: hand over a freshly
    /// parsed, not-yet-answered connection.
    pub fn submit(&self, connection: Arc<dyn DeviceConnection>) {
        self.queue.submit(connection);
    }

    /// Drive admission until `shutdown`. Spawns the timeout sweeper and
    /// one task per admitted connection, bounded by `max_inflight`.
    pub async fn run(self: Arc<Self>) {
        info!(
            "gateway started, transport {}, maximum sessions: {}",
            self.transport,
            self.registry.maximum_sessions(self.transport)
        );
        let sweeper = tokio::spawn(self.queue.clone().run_sweeper());

        loop {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let Some(connection) = self.queue.acquire().await else {
                break;
            };

            let gateway = self.clone();
            tokio::spawn(async move {
                let client_id = connection.client_id().to_string();
                if let Err(err) = gateway.clone().connect(connection).await {
                    error!("accept connection error, client [{}]: {}", client_id, err);
                }
                gateway.queue.settle();
                drop(permit);
            });
        }

        let _ = sweeper.await;
    }

    /// Stop admitting: refuse queued connections and end `run`
    pub fn shutdown(&self) {
        self.queue.close();
        self.permits.close();
    }

    /// The admission pipeline for one connection.
    ///
    /// `Ok(None)` means the connection was answered (rejected) or left
    /// unbound on purpose; `Ok(Some(_))` is a bound session.
    async fn connect(
        self: Arc<Self>,
        connection: Arc<dyn DeviceConnection>,
    ) -> Result<Option<Arc<DeviceSession>>, AcceptError> {
        // Session ceiling first, before any directory work
        if self.registry.is_over_maximum(self.transport) {
            warn!(
                "rejecting client [{}], session limit reached: [{}]",
                connection.client_id(),
                self.registry.maximum_sessions(self.transport)
            );
            self.monitor.rejected_connection(self.transport);
            connection.reject(ConnectReturnCode::ServerUnavailable);
            return Ok(None);
        }

        let Some(credentials) = connection.credentials().cloned() else {
            connection.reject(ConnectReturnCode::NotAuthorized);
            return Ok(None);
        };

        let client_id = connection.client_id().to_string();
        let request = AuthRequest::new(client_id.as_str(), credentials, self.transport);

        let outcome = self.directory.authenticate(&request).await;
        match outcome {
            Err(err) => {
                warn!("device [{}] auth error: {}", client_id, err);
                connection.reject(ConnectReturnCode::ServerUnavailable);
                Ok(None)
            }
            Ok(Some(verdict)) if verdict.success => {
                let device_id = verdict.device_id.unwrap_or(client_id);
                self.accept_device(&device_id, connection).await
            }
            Ok(Some(verdict)) if verdict.code == 401 => {
                info!("device [{}] auth rejected: {}", client_id, verdict.message);
                connection.reject(ConnectReturnCode::BadUserNameOrPassword);
                Ok(None)
            }
            Ok(Some(verdict)) => {
                warn!("device [{}] auth failed: {:?}", client_id, verdict);
                connection.reject(ConnectReturnCode::ServerUnavailable);
                Ok(None)
            }
            Ok(None) => self.defer_unknown(connection).await,
        }
    }

    /// Unknown device: hand the connection to the context with a
    /// single-shot resolver and wait. A dropped resolver completes the
    /// admission as a no-op; resolution after the connection closed is
    /// cancellation, not an error.
    async fn defer_unknown(
        self: Arc<Self>,
        connection: Arc<dyn DeviceConnection>,
    ) -> Result<Option<Arc<DeviceSession>>, AcceptError> {
        let (resolver, resolved) = DeviceResolver::new();
        self.context
            .on_unknown_connection(UnknownConnection::new(connection.clone(), resolver))
            .await;

        match resolved.await {
            Ok(device_id) => {
                if !connection.is_connected() {
                    debug!(
                        "client [{}] resolved to [{}] after close, dropping",
                        connection.client_id(),
                        device_id
                    );
                    return Ok(None);
                }
                self.accept_device(&device_id, connection).await
            }
            Err(_) => Ok(None),
        }
    }

    /// ResolvingIdentity -> Registering: the id must exist in the
    /// directory by now; a miss here is a hard reject, not another
    /// deferral.
    async fn accept_device(
        self: Arc<Self>,
        device_id: &str,
        connection: Arc<dyn DeviceConnection>,
    ) -> Result<Option<Arc<DeviceSession>>, AcceptError> {
        let record = self.directory.lookup(device_id).await;
        match record {
            Ok(Some(_record)) => {
                let session = Arc::new(DeviceSession::new(
                    device_id,
                    self.transport,
                    connection.clone(),
                ));
                self.bind(session).await.map(Some)
            }
            Ok(None) => {
                error!("device [{}] not found", device_id);
                connection.reject(ConnectReturnCode::ServerUnavailable);
                Ok(None)
            }
            Err(err) => {
                error!("get device [{}] error: {}", device_id, err);
                connection.reject(ConnectReturnCode::ServerUnavailable);
                Ok(None)
            }
        }
    }
}
