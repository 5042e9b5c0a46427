//! Configuration
//!
//! TOML-based configuration for the gateway core:
//! - Admission limits (queue size, timeout, in-flight ceiling)
//! - Per-transport session ceilings
//! - Static device directory entries
//! - Metrics endpoint
//! - Environment variable overrides (GATEMQ__* prefix) and
//!   `${VAR:-default}` substitution inside the file

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::protocol::Transport;


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Logging configuration
    pub log: LogConfig,
    /// Admission queue configuration
    pub admission: AdmissionConfig,
    /// Per-transport session ceilings
    pub limits: LimitsConfig,
    /// Static device directory entries
    pub directory: DirectoryConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Admission queue configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum queued connections awaiting admission
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// How long a connection may wait in the queue (e.g. "10s")
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Admission pipelines allowed in flight at once
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
}

fn default_max_queue_size() -> usize {
    10240
}
fn default_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_max_inflight() -> usize {
    256
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            timeout: default_timeout(),
            max_inflight: default_max_inflight(),
        }
    }
}

/// Per-transport maximum concurrent sessions (0 = unlimited)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LimitsConfig {
    pub mqtt: usize,
    pub mqtts: usize,
}

impl LimitsConfig {
    pub fn maximum(&self, transport: Transport) -> usize {
        match transport {
            Transport::Mqtt => self.mqtt,
            Transport::Mqtts => self.mqtts,
        }
    }
}

/// Static device directory configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One directory entry
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Client identifier claimed at connect time
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Canonical device id when it differs from the client id
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind")]
    pub bind: SocketAddr,
}

fn default_metrics_bind() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file with environment variable
    /// overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax
    /// 2. Override via env vars with the `GATEMQ__` prefix and double
    ///    underscores for nesting:
    ///    - `GATEMQ__ADMISSION__MAX_QUEUE_SIZE=2048`
    ///    - `GATEMQ__ADMISSION__TIMEOUT=5s`
    ///    - `GATEMQ__METRICS__ENABLED=true`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("admission.max_queue_size", 10240)?
            .set_default("admission.timeout", "10s")?
            .set_default("admission.max_inflight", 256)?
            .set_default("limits.mqtt", 0)?
            .set_default("limits.mqtts", 0)?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.bind", "127.0.0.1:9090")?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("GATEMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: GatewayConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admission.max_queue_size == 0 {
            return Err(ConfigError::Validation(
                "admission.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.admission.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "admission.timeout must be greater than zero".to_string(),
            ));
        }
        if self.admission.max_inflight == 0 {
            return Err(ConfigError::Validation(
                "admission.max_inflight must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.directory.devices {
            if device.client_id.is_empty() {
                return Err(ConfigError::Validation(
                    "directory device with empty client_id".to_string(),
                ));
            }
            if !seen.insert(&device.client_id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate directory entry for client '{}'",
                    device.client_id
                )));
            }
        }

        Ok(())
    }
}
