//! Per-device policy snapshots and dirty tracking.

use std::collections::BTreeSet;
use std::net::IpAddr;

use gbp_types::{DeviceId, EpKey, Endpoint, PortId};
use parking_lot::Mutex;
use serde::Serialize;

use crate::device::{DeviceListener, DeviceRegistry};
use crate::endpoint::{EndpointIndex, EndpointListener};

/// Desired configuration of one device, handed to the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DevicePolicy {
    pub device: DeviceId,
    pub tunnel_port: Option<PortId>,
    pub tunnel_ip: Option<IpAddr>,
    pub external_ports: BTreeSet<PortId>,
    /// Endpoints located on the device, sorted by key.
    pub endpoints: Vec<Endpoint>,
}

impl DevicePolicy {
    /// Builds the policy for `device`, or `None` if it is not Ready.
    pub fn build(
        device: &DeviceId,
        registry: &DeviceRegistry,
        index: &EndpointIndex,
    ) -> Option<Self> {
        let snapshot = registry.snapshot(device)?;
        if !snapshot.status.is_ready() {
            return None;
        }
        Some(Self {
            device: snapshot.id,
            tunnel_port: snapshot.tunnel_port,
            tunnel_ip: snapshot.tunnel_ip,
            external_ports: snapshot.external_ports,
            endpoints: index.endpoints_for_device(device),
        })
    }
}

/// Collects devices whose policy may have changed since the last flush.
#[derive(Debug, Default)]
pub(crate) struct DirtyDevices {
    devices: Mutex<BTreeSet<DeviceId>>,
}

impl DirtyDevices {
    pub(crate) fn mark(&self, device: &DeviceId) {
        self.devices.lock().insert(device.clone());
    }

    pub(crate) fn take(&self) -> BTreeSet<DeviceId> {
        std::mem::take(&mut *self.devices.lock())
    }
}

impl DeviceListener for DirtyDevices {
    fn on_device_ready(&self, device: &DeviceId) {
        self.mark(device);
    }

    fn on_device_updated(&self, device: &DeviceId) {
        self.mark(device);
    }

    fn on_device_removed(&self, device: &DeviceId) {
        self.mark(device);
    }

    fn on_device_unready(&self, device: &DeviceId) {
        self.mark(device);
    }
}

impl EndpointListener for DirtyDevices {
    fn on_device_endpoint_updated(&self, device: &DeviceId, _key: &EpKey) {
        self.mark(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInventory, DeviceRegistryConfig, PortInfo};
    use gbp_types::{Location, MacAddress};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_build_requires_ready_device() {
        let registry = DeviceRegistry::new(DeviceRegistryConfig::default()).unwrap();
        let index = EndpointIndex::new();
        let sw1 = DeviceId::new("sw1");

        assert_eq!(DevicePolicy::build(&sw1, &registry, &index), None);

        registry.on_inventory_change(
            &sw1,
            Some(DeviceInventory::new().with_port(PortInfo::named("p1", "eth0_vxlan3"))),
        );
        let ep = Endpoint::new(EpKey::new("ctx1", MacAddress::new([0, 0, 0, 0, 0, 1])))
            .with_location(Location::new("sw1", "port1"));
        index.update_endpoint(None, Some(ep.clone()));

        let policy = DevicePolicy::build(&sw1, &registry, &index).unwrap();
        assert_eq!(policy.tunnel_port, Some(PortId::new("p1")));
        assert_eq!(policy.endpoints, vec![ep]);
    }

    #[test]
    fn test_dirty_devices_collects_from_both_sources() {
        let registry = DeviceRegistry::new(DeviceRegistryConfig::default()).unwrap();
        let index = EndpointIndex::new();
        let dirty = Arc::new(DirtyDevices::default());
        registry.register_listener(dirty.clone());
        index.register_listener(dirty.clone());

        registry.on_inventory_change(&DeviceId::new("sw2"), Some(DeviceInventory::new()));
        let ep = Endpoint::new(EpKey::new("ctx1", MacAddress::new([0, 0, 0, 0, 0, 1])))
            .with_location(Location::new("sw1", "port1"));
        index.update_endpoint(None, Some(ep));

        let taken: Vec<DeviceId> = dirty.take().into_iter().collect();
        assert_eq!(taken, vec![DeviceId::new("sw1"), DeviceId::new("sw2")]);
        assert!(dirty.take().is_empty());
    }
}
