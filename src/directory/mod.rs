//! Device directory boundary
//!
//! Authentication and identity resolution for connecting devices. The
//! platform's real directory lives behind `DeviceDirectory`;
//! `StaticDirectory` is the config-backed implementation used for small
//! deployments and tests.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::config::DirectoryConfig;
use crate::connection::Credentials;
use crate::protocol::Transport;


/// Directory error types
#[derive(Debug)]
pub enum DirectoryError {
    /// The directory backend could not be reached
    Unavailable(String),
    /// The backend answered but the reply was unusable
    Invalid(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Unavailable(msg) => write!(f, "directory unavailable: {}", msg),
            DirectoryError::Invalid(msg) => write!(f, "directory reply invalid: {}", msg),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// One authentication attempt
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub transport: Transport,
}

impl AuthRequest {
    pub fn new(client_id: impl Into<String>, credentials: Credentials, transport: Transport) -> Self {
        Self {
            client_id: client_id.into(),
            username: credentials.username,
            password: credentials.password,
            transport,
        }
    }
}

/// Verdict of one authentication attempt.
///
/// Ephemeral; produced and consumed within a single admission attempt.
#[derive(Debug, Clone)]
pub struct AuthVerdict {
    pub success: bool,
    /// Canonical device identifier, when the directory resolves one
    pub device_id: Option<String>,
    pub code: u16,
    pub message: String,
}

impl AuthVerdict {
    pub fn ok(device_id: Option<String>) -> Self {
        Self {
            success: true,
            device_id,
            code: 200,
            message: "ok".to_string(),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            device_id: None,
            code,
            message: message.into(),
        }
    }
}

/// Directory entry existence proof for a device identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub name: Option<String>,
}

/// The device directory collaborator.
///
/// `authenticate` answers `Ok(None)` when the claimed identity is not in
/// the directory at all; the admission pipeline hands such connections to
/// the unknown-connection path instead of rejecting them.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> Result<Option<AuthVerdict>, DirectoryError>;

    /// Resolve a device identifier to its directory record
    async fn lookup(&self, device_id: &str) -> Result<Option<DeviceRecord>, DirectoryError>;
}

/// Internal device entry
struct DeviceEntry {
    username: String,
    password: String,
    /// Canonical device id when it differs from the client id
    device_id: Option<String>,
    name: Option<String>,
}

/// Config-backed device directory
pub struct StaticDirectory {
    /// Entries keyed by client identifier
    devices: HashMap<String, DeviceEntry>,
    /// Canonical device id -> client id, for lookups after resolution
    canonical: HashMap<String, String>,
}

impl StaticDirectory {
    /// Build a directory from configuration
    pub fn new(config: &DirectoryConfig) -> Self {
        let mut devices = HashMap::new();
        let mut canonical = HashMap::new();

        for device in &config.devices {
            if let Some(id) = &device.device_id {
                canonical.insert(id.clone(), device.client_id.clone());
            }
            devices.insert(
                device.client_id.clone(),
                DeviceEntry {
                    username: device.username.clone(),
                    password: device.password.clone(),
                    device_id: device.device_id.clone(),
                    name: device.name.clone(),
                },
            );
        }

        Self { devices, canonical }
    }

    fn record_for(&self, device_id: &str) -> Option<DeviceRecord> {
        let entry = self.devices.get(device_id).or_else(|| {
            self.canonical
                .get(device_id)
                .and_then(|client_id| self.devices.get(client_id))
        })?;
        Some(DeviceRecord {
            id: entry
                .device_id
                .clone()
                .unwrap_or_else(|| device_id.to_string()),
            name: entry.name.clone(),
        })
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> Result<Option<AuthVerdict>, DirectoryError> {
        let entry = match self.devices.get(&request.client_id) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if entry.username == request.username && entry.password == request.password {
            Ok(Some(AuthVerdict::ok(entry.device_id.clone())))
        } else {
            Ok(Some(AuthVerdict::error(401, "bad username or password")))
        }
    }

    async fn lookup(&self, device_id: &str) -> Result<Option<DeviceRecord>, DirectoryError> {
        Ok(self.record_for(device_id))
    }
}
