//! Change events consumed by the daemon.

use std::fs;
use std::path::Path;

use gbp_types::{DeviceId, Endpoint, PortId};
use serde::{Deserialize, Serialize};

use crate::device::{DeviceConfig, DeviceInventory, PortInfo};
use crate::error::DaemonError;

/// One notification from the change source.
///
/// Absent fields decode as `None`, so `{"kind":"inventory","device":"sw1"}`
/// is an inventory removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Endpoint {
        #[serde(default)]
        old: Option<Endpoint>,
        #[serde(default)]
        new: Option<Endpoint>,
    },
    Inventory {
        device: DeviceId,
        #[serde(default)]
        inventory: Option<DeviceInventory>,
    },
    Port {
        device: DeviceId,
        port: PortId,
        #[serde(default)]
        info: Option<PortInfo>,
    },
    Config {
        device: DeviceId,
        #[serde(default)]
        config: Option<DeviceConfig>,
    },
}

impl ChangeEvent {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeEvent::Endpoint { .. } => "endpoint",
            ChangeEvent::Inventory { .. } => "inventory",
            ChangeEvent::Port { .. } => "port",
            ChangeEvent::Config { .. } => "config",
        }
    }
}

/// Reads a replay file: a JSON array of event batches.
pub fn load_replay(path: impl AsRef<Path>) -> Result<Vec<Vec<ChangeEvent>>, DaemonError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| DaemonError::ReplayIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| DaemonError::ReplayDecode {
        path: path.to_path_buf(),
        source,
    })
}
