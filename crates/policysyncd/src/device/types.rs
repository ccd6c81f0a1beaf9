//! Device types and data structures.

use gbp_types::{DeviceId, PortId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Connectivity lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// No inventory has been received.
    Disconnected,
    /// Inventory is present but provisioning is incomplete.
    Preparing,
    /// The device can receive policy.
    Ready,
}

impl DeviceStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceStatus::Ready)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Disconnected => write!(f, "disconnected"),
            DeviceStatus::Preparing => write!(f, "preparing"),
            DeviceStatus::Ready => write!(f, "ready"),
        }
    }
}

/// A port as reported by device inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub id: PortId,
    /// Interface name. Unnamed ports are never tunnel or external ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PortInfo {
    pub fn new(id: impl Into<PortId>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn named(id: impl Into<PortId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

/// Raw inventory snapshot of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInventory {
    #[serde(default)]
    pub ports: Vec<PortInfo>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl DeviceInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a port (builder pattern).
    pub fn with_port(mut self, port: PortInfo) -> Self {
        self.set_port(port);
        self
    }

    /// Adds a capability (builder pattern).
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Inserts or replaces the port with the same id, keeping port order.
    pub fn set_port(&mut self, port: PortInfo) {
        match self.ports.iter_mut().find(|p| p.id == port.id) {
            Some(existing) => *existing = port,
            None => self.ports.push(port),
        }
    }

    /// Removes a port. Returns true if it was present.
    pub fn remove_port(&mut self, id: &PortId) -> bool {
        let before = self.ports.len();
        self.ports.retain(|p| &p.id != id);
        self.ports.len() != before
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Administrator configuration for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Regex patterns; a port whose whole name matches one is external.
    #[serde(default)]
    pub external_interfaces: Vec<String>,
    /// Tunnel endpoint address of the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_ip: Option<IpAddr>,
}

impl DeviceConfig {
    pub fn with_external_interface(mut self, pattern: impl Into<String>) -> Self {
        self.external_interfaces.push(pattern.into());
        self
    }

    pub fn with_tunnel_ip(mut self, ip: IpAddr) -> Self {
        self.tunnel_ip = Some(ip);
        self
    }
}

/// Point-in-time view of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub status: DeviceStatus,
    pub tunnel_port: Option<PortId>,
    pub external_ports: BTreeSet<PortId>,
    pub tunnel_ip: Option<IpAddr>,
}

/// Device lifecycle listener.
///
/// Called synchronously, in registration order, after the registry has
/// released its internal locks, so listeners may query the registry.
pub trait DeviceListener: Send + Sync {
    /// The device entered Ready from a non-ready state.
    fn on_device_ready(&self, _device: &DeviceId) {}

    /// The device's inventory or configuration changed while Ready.
    fn on_device_updated(&self, _device: &DeviceId) {}

    /// The device was removed from inventory.
    fn on_device_removed(&self, _device: &DeviceId) {}

    /// The device left Ready but is still known.
    fn on_device_unready(&self, _device: &DeviceId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_port_replaces_in_place() {
        let mut inventory = DeviceInventory::new()
            .with_port(PortInfo::named("1", "eth0"))
            .with_port(PortInfo::named("2", "eth1"));
        inventory.set_port(PortInfo::named("1", "eth0_vxlan0"));

        let names: Vec<Option<&str>> = inventory.ports.iter().map(|p| p.name.as_deref()).collect();
        assert_eq!(names, vec![Some("eth0_vxlan0"), Some("eth1")]);
        assert!(inventory.remove_port(&PortId::new("2")));
        assert!(!inventory.remove_port(&PortId::new("2")));
    }

    #[test]
    fn test_inventory_deserialization() {
        let json = r#"{"ports":[{"id":"1","name":"eth0_tun2"}],"capabilities":["flow"]}"#;
        let inventory: DeviceInventory = serde_json::from_str(json).unwrap();
        assert_eq!(inventory.ports, vec![PortInfo::named("1", "eth0_tun2")]);
        assert!(inventory.has_capability("flow"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DeviceStatus::Preparing.to_string(), "preparing");
        assert!(DeviceStatus::Ready.is_ready());
    }
}
