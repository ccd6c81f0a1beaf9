//! DeviceRegistry implementation.
//!
//! Tracks each device through `Disconnected -> Preparing -> Ready`, derives
//! tunnel and external port classification from inventory plus administrator
//! configuration, and notifies listeners of readiness transitions.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gbp_types::{DeviceId, PortId};
use log::{debug, info};
use parking_lot::RwLock;
use regex::Regex;

use super::classify::{classify_ports, ExternalPatterns};
use super::types::{
    DeviceConfig, DeviceInventory, DeviceListener, DeviceSnapshot, DeviceStatus, PortInfo,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::DEFAULT_TUNNEL_PORT_PATTERN;
use crate::error::ConfigError;

/// Configuration for DeviceRegistry.
#[derive(Debug, Clone)]
pub struct DeviceRegistryConfig {
    /// Regex identifying a tunnel port by name.
    pub tunnel_port_pattern: String,
    /// Capabilities required before a device is Ready. Empty means any
    /// inventory is enough.
    pub required_capabilities: Vec<String>,
}

impl Default for DeviceRegistryConfig {
    fn default() -> Self {
        Self {
            tunnel_port_pattern: DEFAULT_TUNNEL_PORT_PATTERN.to_string(),
            required_capabilities: Vec::new(),
        }
    }
}

/// Statistics for DeviceRegistry operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistryStats {
    /// Transitions into Ready.
    pub devices_ready: u64,
    /// Content updates while Ready.
    pub devices_updated: u64,
    /// Removals from inventory.
    pub devices_removed: u64,
    /// Transitions from Ready back to Preparing.
    pub devices_unready: u64,
    /// Notifications dropped as malformed or irrelevant.
    pub ignored_events: u64,
}

#[derive(Default)]
struct Counters {
    devices_ready: AtomicU64,
    devices_updated: AtomicU64,
    devices_removed: AtomicU64,
    devices_unready: AtomicU64,
    ignored_events: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Ready,
    Updated,
    Unready,
    Removed,
}

#[derive(Debug)]
struct DeviceEntry {
    status: DeviceStatus,
    inventory: Option<DeviceInventory>,
    tunnel_port: Option<PortId>,
    external_ports: BTreeSet<PortId>,
}

impl DeviceEntry {
    fn new() -> Self {
        Self {
            status: DeviceStatus::Disconnected,
            inventory: None,
            tunnel_port: None,
            external_ports: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
struct ConfiguredDevice {
    config: DeviceConfig,
    external: ExternalPatterns,
}

/// DeviceRegistry - per-device lifecycle and port classification.
///
/// A device entry is created by the first notification referencing its id
/// and destroyed when it is removed from inventory. A later notification for
/// the same id starts a fresh lifecycle. Administrator configuration is kept
/// separately and survives inventory removal.
pub struct DeviceRegistry {
    config: DeviceRegistryConfig,
    tunnel_pattern: Regex,
    devices: DashMap<DeviceId, DeviceEntry>,
    configs: DashMap<DeviceId, Arc<ConfiguredDevice>>,
    listeners: RwLock<Vec<Arc<dyn DeviceListener>>>,
    counters: Counters,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("config", &self.config)
            .field("device_count", &self.devices.len())
            .field("listener_count", &self.listeners.read().len())
            .finish()
    }
}

impl DeviceRegistry {
    /// Creates a registry. Fails if the tunnel port pattern is not a valid
    /// regex.
    pub fn new(config: DeviceRegistryConfig) -> Result<Self, ConfigError> {
        let tunnel_pattern = Regex::new(&config.tunnel_port_pattern).map_err(|e| {
            ConfigError::Invalid(format!(
                "invalid tunnel port pattern {:?}: {}",
                config.tunnel_port_pattern, e
            ))
        })?;
        Ok(Self {
            config,
            tunnel_pattern,
            devices: DashMap::new(),
            configs: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &DeviceRegistryConfig {
        &self.config
    }

    /// Registers a listener. Listeners are invoked in registration order.
    pub fn register_listener(&self, listener: Arc<dyn DeviceListener>) {
        self.listeners.write().push(listener);
    }

    /// Handles an inventory notification. `None` means the device left
    /// inventory.
    pub fn on_inventory_change(&self, device: &DeviceId, inventory: Option<DeviceInventory>) {
        if device.is_empty() {
            self.ignore("inventory notification with empty device id");
            return;
        }

        let transition = match inventory {
            Some(inventory) => {
                let mut entry = self.devices.entry(device.clone()).or_insert_with(DeviceEntry::new);
                entry.inventory = Some(inventory);
                self.recompute(device, &mut entry)
            }
            None => self.remove_device(device),
        };

        if let Some(transition) = transition {
            self.notify(device, transition);
        }
    }

    /// Patches a single port of the stored inventory. `None` removes the
    /// port. Ignored for devices without inventory.
    pub fn on_port_change(&self, device: &DeviceId, port: &PortId, info: Option<PortInfo>) {
        if let Some(info) = &info {
            if &info.id != port {
                self.ignore("port notification id mismatch");
                return;
            }
        }

        let transition = {
            let Some(mut entry) = self.devices.get_mut(device) else {
                self.ignore("port notification for unknown device");
                return;
            };
            let Some(inventory) = entry.inventory.as_mut() else {
                self.ignore("port notification for device without inventory");
                return;
            };
            match info {
                Some(info) => inventory.set_port(info),
                None => {
                    if !inventory.remove_port(port) {
                        return;
                    }
                }
            }
            self.recompute(device, &mut entry)
        };

        if let Some(transition) = transition {
            self.notify(device, transition);
        }
    }

    /// Handles an administrator configuration notification. `None` clears
    /// the configuration.
    pub fn on_config_change(&self, device: &DeviceId, config: Option<DeviceConfig>) {
        if device.is_empty() {
            self.ignore("config notification with empty device id");
            return;
        }

        let record = match &config {
            Some(config) => AuditRecord::new(
                AuditCategory::ConfigurationChange,
                "DeviceRegistry",
                "device_config_set",
            )
            .with_details(serde_json::json!({
                "external_interfaces": config.external_interfaces,
                "tunnel_ip": config.tunnel_ip,
            })),
            None => AuditRecord::new(
                AuditCategory::ConfigurationChange,
                "DeviceRegistry",
                "device_config_cleared",
            ),
        };
        audit_log!(record
            .with_outcome(AuditOutcome::Success)
            .with_object_id(device.as_str())
            .with_object_type("device"));

        match config {
            Some(config) => {
                let external = ExternalPatterns::compile(&config.external_interfaces);
                self.configs
                    .insert(device.clone(), Arc::new(ConfiguredDevice { config, external }));
            }
            None => {
                self.configs.remove(device);
            }
        }

        let transition = {
            let mut entry = self.devices.entry(device.clone()).or_insert_with(DeviceEntry::new);
            if entry.inventory.is_none() {
                // Configuration alone does not make a device reachable.
                None
            } else {
                self.recompute(device, &mut entry)
            }
        };
        self.devices
            .remove_if(device, |_, e| e.inventory.is_none() && !self.configs.contains_key(device));

        if let Some(transition) = transition {
            self.notify(device, transition);
        }
    }

    fn remove_device(&self, device: &DeviceId) -> Option<Transition> {
        match self.devices.entry(device.clone()) {
            Entry::Occupied(mut entry) if entry.get().inventory.is_some() => {
                let previous = entry.get().status;
                if self.configs.contains_key(device) {
                    *entry.get_mut() = DeviceEntry::new();
                } else {
                    entry.remove();
                }
                info!("Device {} removed (was {})", device, previous);
                Some(Transition::Removed)
            }
            _ => {
                self.ignore("inventory removal for device without inventory");
                None
            }
        }
    }

    /// Recomputes status and port classification. Must be called with the
    /// device entry locked.
    fn recompute(&self, device: &DeviceId, entry: &mut DeviceEntry) -> Option<Transition> {
        let external = self
            .configs
            .get(device)
            .map(|c| c.external.clone())
            .unwrap_or_default();

        let previous = entry.status;
        let next = match &entry.inventory {
            None => DeviceStatus::Disconnected,
            Some(inventory) => {
                let classification = classify_ports(&inventory.ports, &self.tunnel_pattern, &external);
                entry.tunnel_port = classification.tunnel_port;
                entry.external_ports = classification.external_ports;

                let missing = self.missing_capabilities(inventory);
                if missing.is_empty() {
                    DeviceStatus::Ready
                } else {
                    debug!("Device {} missing capabilities {:?}", device, missing);
                    DeviceStatus::Preparing
                }
            }
        };
        entry.status = next;

        if previous != next {
            debug!("Device {} status {} -> {}", device, previous, next);
        }
        match (previous.is_ready(), next.is_ready()) {
            (false, true) => Some(Transition::Ready),
            (true, true) => Some(Transition::Updated),
            (true, false) => Some(Transition::Unready),
            (false, false) => None,
        }
    }

    fn missing_capabilities<'a>(&'a self, inventory: &DeviceInventory) -> Vec<&'a str> {
        self.config
            .required_capabilities
            .iter()
            .filter(|c| !inventory.has_capability(c))
            .map(String::as_str)
            .collect()
    }

    fn notify(&self, device: &DeviceId, transition: Transition) {
        let (category, action) = match transition {
            Transition::Ready => (AuditCategory::ResourceCreate, "device_ready"),
            Transition::Updated => (AuditCategory::ResourceModify, "device_updated"),
            Transition::Unready => (AuditCategory::ResourceDelete, "device_unready"),
            Transition::Removed => (AuditCategory::ResourceDelete, "device_removed"),
        };
        let counter = match transition {
            Transition::Ready => &self.counters.devices_ready,
            Transition::Updated => &self.counters.devices_updated,
            Transition::Unready => &self.counters.devices_unready,
            Transition::Removed => &self.counters.devices_removed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if transition != Transition::Updated {
            let record = AuditRecord::new(category, "DeviceRegistry", action)
                .with_outcome(AuditOutcome::Success)
                .with_object_id(device.as_str())
                .with_object_type("device");
            audit_log!(record);
        }

        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            match transition {
                Transition::Ready => listener.on_device_ready(device),
                Transition::Updated => listener.on_device_updated(device),
                Transition::Unready => listener.on_device_unready(device),
                Transition::Removed => listener.on_device_removed(device),
            }
        }
    }

    fn ignore(&self, reason: &str) {
        debug!("Ignoring {}", reason);
        self.counters.ignored_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true if the device is Ready.
    pub fn is_ready(&self, device: &DeviceId) -> bool {
        self.devices
            .get(device)
            .map(|e| e.status.is_ready())
            .unwrap_or(false)
    }

    /// Returns the device status, or `None` for an unknown device.
    pub fn status(&self, device: &DeviceId) -> Option<DeviceStatus> {
        self.devices.get(device).map(|e| e.status)
    }

    /// External ports of the device; empty if unknown.
    pub fn external_ports(&self, device: &DeviceId) -> BTreeSet<PortId> {
        self.devices
            .get(device)
            .map(|e| e.external_ports.clone())
            .unwrap_or_default()
    }

    /// Tunnel port of the device, if it has one.
    pub fn tunnel_port(&self, device: &DeviceId) -> Option<PortId> {
        self.devices.get(device).and_then(|e| e.tunnel_port.clone())
    }

    /// Tunnel address from the device's configuration.
    pub fn tunnel_ip(&self, device: &DeviceId) -> Option<IpAddr> {
        self.configs.get(device).and_then(|c| c.config.tunnel_ip)
    }

    /// Ids of all Ready devices, sorted.
    pub fn ready_devices(&self) -> Vec<DeviceId> {
        let mut ready: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|e| e.status.is_ready())
            .map(|e| e.key().clone())
            .collect();
        ready.sort();
        ready
    }

    /// Point-in-time view of one device.
    pub fn snapshot(&self, device: &DeviceId) -> Option<DeviceSnapshot> {
        let snapshot = self.devices.get(device).map(|e| DeviceSnapshot {
            id: device.clone(),
            status: e.status,
            tunnel_port: e.tunnel_port.clone(),
            external_ports: e.external_ports.clone(),
            tunnel_ip: None,
        })?;
        Some(DeviceSnapshot {
            tunnel_ip: self.tunnel_ip(device),
            ..snapshot
        })
    }

    /// Number of known devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn stats(&self) -> DeviceRegistryStats {
        DeviceRegistryStats {
            devices_ready: self.counters.devices_ready.load(Ordering::Relaxed),
            devices_updated: self.counters.devices_updated.load(Ordering::Relaxed),
            devices_removed: self.counters.devices_removed.load(Ordering::Relaxed),
            devices_unready: self.counters.devices_unready.load(Ordering::Relaxed),
            ignored_events: self.counters.ignored_events.load(Ordering::Relaxed),
        }
    }
}
