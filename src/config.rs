//! Connection settings and their defaults.
//!
//! [`ConnectionConfig`] deserializes from JSON with every field optional;
//! missing keys take the `DEFAULT_*` values and unknown keys are rejected.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{DriverError, Result};
use crate::protocol::{Compression, EventType, DEFAULT_MAX_BODY_SIZE, SUPPORTED_VERSIONS};
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9042;
pub const DEFAULT_PROTOCOL_VERSION: u8 = 2;
pub const DEFAULT_CQL_VERSION: &str = "3.0.0";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for one connection.
///
/// Every field has a default, so a JSON document only needs the keys it
/// overrides:
///
/// ```
/// use cqlwire_client::ConnectionConfig;
///
/// let config = ConnectionConfig::from_json_str(
///     r#"{ "host": "10.0.0.5", "compression": "lz4", "request_timeout_ms": 2000 }"#,
/// ).unwrap();
/// assert_eq!(config.port, 9042);
/// assert_eq!(config.request_timeout().as_millis(), 2000);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub compression: Compression,
    pub tracing: bool,
    pub protocol_version: u8,
    pub cql_version: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Event types REGISTERed right after the handshake.
    pub register_events: Vec<EventType>,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_frame_size: u32,
    pub max_pending_frames: usize,
    pub channel_capacity: usize,
    pub backpressure_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            compression: Compression::None,
            tracing: false,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            cql_version: DEFAULT_CQL_VERSION.to_string(),
            username: None,
            password: None,
            register_events: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            max_frame_size: DEFAULT_MAX_BODY_SIZE,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ConnectionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ConnectionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Reject settings the connection cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.protocol_version) {
            return Err(DriverError::Config(format!(
                "Unsupported protocol version {} (supported: {:?})",
                self.protocol_version, SUPPORTED_VERSIONS
            )));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(DriverError::Config(
                "username and password must be set together".to_string(),
            ));
        }
        for (name, value) in [
            ("cql_version", Some(&self.cql_version)),
            ("username", self.username.as_ref()),
            ("password", self.password.as_ref()),
        ] {
            if value.is_some_and(|v| v.len() > u16::MAX as usize) {
                return Err(DriverError::Config(format!(
                    "{} longer than {} bytes",
                    name,
                    u16::MAX
                )));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(DriverError::Config(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.channel_capacity == 0 || self.max_pending_frames == 0 {
            return Err(DriverError::Config(
                "writer queue sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_frames: self.max_pending_frames,
            channel_capacity: self.channel_capacity,
            backpressure_timeout: Duration::from_millis(self.backpressure_timeout_ms),
        }
    }

    /// Credentials, if both parts are configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}
