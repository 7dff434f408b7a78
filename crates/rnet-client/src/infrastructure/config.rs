//! TOML configuration for the RNET client.
//!
//! The file lives at the platform config location unless `--config` names
//! another one:
//! - Windows:  `%APPDATA%\RnetBridge\client.toml`
//! - Linux:    `~/.config/rnet-bridge/client.toml`
//! - macOS:    `~/Library/Application Support/RnetBridge/client.toml`
//!
//! ```toml
//! [client]
//! log_level = "debug"
//!
//! [client.local_address]
//! controller_id = 0
//! zone_id = 0
//! keypad_id = 112
//!
//! [connection]
//! transport = "serial"
//! serial_port = "/dev/ttyUSB0"
//! baud_rate = 19200
//!
//! [session]
//! request_timeout_ms = 750
//! retries = 2
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section, or
//! a file written by an older version all load cleanly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rnet_core::DeviceAddress;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::session::SessionConfig;
use crate::infrastructure::connection::Transport;
use crate::infrastructure::serial::{SerialTransport, DEFAULT_BAUD_RATE};
use crate::infrastructure::tcp::TcpTransport;

/// Failures loading or saving the client config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `--config` nor a platform config directory is available.
    #[error("no config directory for this platform; pass --config")]
    NoPlatformConfigDir,

    /// Reading or writing the file failed.
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ClientConfig`].
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// [`ClientConfig`] could not be rendered as TOML.
    #[error("could not render config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub session: SessionSection,
}

/// Identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Address this client claims on the bus.
    #[serde(default = "DeviceAddress::external")]
    pub local_address: DeviceAddress,
}

/// Which kind of byte stream reaches the bus.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Serial,
}

/// Transport settings.  Only the fields for the selected `transport` are used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Request pacing and buffering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// How long to wait for a reply before resending.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Resends after the first attempt before a request times out.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Period of the timeout scan; bounds timeout accuracy.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Answer every inbound SetData packet with a data handshake.
    #[serde(default = "default_true")]
    pub acknowledge_data: bool,
    /// Capacity of the session event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4001
}
fn default_connect_timeout_ms() -> u64 {
    3_000
}
fn default_serial_port() -> String {
    if cfg!(target_os = "windows") {
        "COM1".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_request_timeout_ms() -> u64 {
    500
}
fn default_retries() -> u32 {
    3
}
fn default_scan_interval_ms() -> u64 {
    25
}
fn default_true() -> bool {
    true
}
fn default_event_capacity() -> usize {
    256
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            local_address: DeviceAddress::external(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            retries: default_retries(),
            scan_interval_ms: default_scan_interval_ms(),
            acknowledge_data: default_true(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ConnectionConfig {
    /// Builds the transport selected by `transport`.
    pub fn build_transport(&self) -> Arc<dyn Transport> {
        match self.transport {
            TransportKind::Tcp => Arc::new(TcpTransport::new(
                self.host.clone(),
                self.port,
                Duration::from_millis(self.connect_timeout_ms),
            )),
            TransportKind::Serial => {
                Arc::new(SerialTransport::new(self.serial_port.clone(), self.baud_rate))
            }
        }
    }
}

impl ClientConfig {
    /// Session settings derived from the `[client]` and `[session]` sections.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            local_address: self.client.local_address,
            request_timeout: Duration::from_millis(self.session.request_timeout_ms),
            retries: self.session.retries,
            scan_interval: Duration::from_millis(self.session.scan_interval_ms)
                .max(SessionConfig::MIN_SCAN_INTERVAL),
            acknowledge_data: self.session.acknowledge_data,
            event_capacity: self.session.event_capacity.max(1),
            ..SessionConfig::default()
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Full path of the config file in the platform config directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory cannot
/// be determined from the environment.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("client.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ClientConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("RnetBridge"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("rnet-bridge"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("RnetBridge")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
