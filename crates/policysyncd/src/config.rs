//! Configuration file support for policysyncd
//!
//! Loads and validates policysyncd configuration from TOML files.
//! Default location: /etc/policysyncd/policysyncd.toml

use crate::device::DeviceRegistryConfig;
use crate::error::ConfigError;
use gbp_sync_common::SyncCoalescerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/policysyncd/policysyncd.toml";

/// Default tunnel port naming convention: `<name>_vxlan<N>` or `<name>_tun<N>`
pub const DEFAULT_TUNNEL_PORT_PATTERN: &str = r"(?:_vxlan|_tun)\d+$";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable multi-line output
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

/// Device registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Regex identifying a device's tunnel port by name
    #[serde(default = "default_tunnel_port_pattern")]
    pub tunnel_port_pattern: String,

    /// Capabilities a device must report before it is considered ready
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

/// Sync coalescer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescerConfig {
    /// Maximum concurrent pushes across all devices
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// How long shutdown waits for in-flight pushes
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

/// Event loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Capacity of the event batch channel
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,
}

/// Complete policysyncd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySyncConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub coalescer: CoalescerConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

// Default functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_tunnel_port_pattern() -> String {
    DEFAULT_TUNNEL_PORT_PATTERN.to_string()
}

fn default_max_in_flight() -> usize {
    8
}

fn default_shutdown_timeout() -> u64 {
    10_000
}

fn default_event_queue_depth() -> usize {
    1024
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tunnel_port_pattern: default_tunnel_port_pattern(),
            required_capabilities: Vec::new(),
        }
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            event_queue_depth: default_event_queue_depth(),
        }
    }
}

impl PolicySyncConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "policysyncd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load configuration from file; the file must exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.coalescer.shutdown_timeout_ms)
    }

    /// Coalescer settings in the form the coalescer takes them
    pub fn coalescer_config(&self) -> SyncCoalescerConfig {
        SyncCoalescerConfig::default()
            .with_max_in_flight(self.coalescer.max_in_flight)
            .with_shutdown_timeout(self.shutdown_timeout())
    }

    /// Registry settings in the form the registry takes them
    pub fn registry_config(&self) -> DeviceRegistryConfig {
        DeviceRegistryConfig {
            tunnel_port_pattern: self.registry.tunnel_port_pattern.clone(),
            required_capabilities: self.registry.required_capabilities.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {:?}, got {:?}",
                LOG_LEVELS, self.logging.level
            )));
        }

        if let Err(e) = regex::Regex::new(&self.registry.tunnel_port_pattern) {
            return Err(ConfigError::Invalid(format!(
                "registry.tunnel_port_pattern is not a valid regex: {}",
                e
            )));
        }

        if self.coalescer.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "coalescer.max_in_flight must be >= 1".to_string(),
            ));
        }

        if self.daemon.event_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "daemon.event_queue_depth must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}
