//! Error types for policysyncd

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Config could not be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon setup and replay errors
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Replay file could not be read
    #[error("Failed to read replay file {path}: {source}")]
    ReplayIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Replay file is not a JSON list of event batches
    #[error("Failed to decode replay file {path}: {source}")]
    ReplayDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
