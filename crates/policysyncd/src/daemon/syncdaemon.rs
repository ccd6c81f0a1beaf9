//! PolicySyncDaemon implementation.
//!
//! The daemon is the composition root. It owns:
//! - the endpoint index and device registry
//! - the sync coalescer in front of the synchronizer
//! - the last policy submitted per device
//!
//! Events are applied in batches. After each batch every device touched by a
//! listener callback gets its policy recomputed and, if it changed, submitted.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gbp_sync_common::{CloseOutcome, PolicySynchronizer, SyncCoalescer, SyncCoalescerStats, SyncTicket};
use gbp_types::{DeviceId, EgKey, Endpoint, PortId};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::event::ChangeEvent;
use super::policy::{DevicePolicy, DirtyDevices};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::PolicySyncConfig;
use crate::device::{
    DeviceConfig, DeviceInventory, DeviceListener, DeviceRegistry, DeviceRegistryStats, PortInfo,
};
use crate::endpoint::{EndpointIndex, EndpointIndexStats, EndpointListener};
use crate::error::DaemonError;

/// Statistics across the daemon and its components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStats {
    /// Event batches applied.
    pub batches: u64,
    /// Device policies handed to the coalescer.
    pub policies_submitted: u64,
    pub endpoints: EndpointIndexStats,
    pub devices: DeviceRegistryStats,
    pub coalescer: SyncCoalescerStats,
}

/// Policy sync daemon.
///
/// Must be created inside a tokio runtime.
pub struct PolicySyncDaemon<S>
where
    S: PolicySynchronizer<Target = DeviceId, Config = DevicePolicy>,
{
    index: Arc<EndpointIndex>,
    registry: Arc<DeviceRegistry>,
    coalescer: SyncCoalescer<S>,
    dirty: Arc<DirtyDevices>,
    /// Last policy submitted per device. Held for the whole flush.
    published: Mutex<HashMap<DeviceId, DevicePolicy>>,
    batches: AtomicU64,
    policies_submitted: AtomicU64,
}

impl<S> PolicySyncDaemon<S>
where
    S: PolicySynchronizer<Target = DeviceId, Config = DevicePolicy>,
{
    /// Validates `config` and wires the components together.
    pub fn new(config: &PolicySyncConfig, synchronizer: Arc<S>) -> Result<Self, DaemonError> {
        config.validate()?;

        let registry = Arc::new(DeviceRegistry::new(config.registry_config())?);
        let index = Arc::new(EndpointIndex::new());
        let dirty = Arc::new(DirtyDevices::default());
        registry.register_listener(dirty.clone());
        index.register_listener(dirty.clone());

        let coalescer = SyncCoalescer::new(synchronizer, config.coalescer_config());
        info!(
            "PolicySyncDaemon created (max_in_flight={})",
            coalescer.config().max_in_flight
        );

        Ok(Self {
            index,
            registry,
            coalescer,
            dirty,
            published: Mutex::new(HashMap::new()),
            batches: AtomicU64::new(0),
            policies_submitted: AtomicU64::new(0),
        })
    }

    pub fn index(&self) -> &Arc<EndpointIndex> {
        &self.index
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn coalescer(&self) -> &SyncCoalescer<S> {
        &self.coalescer
    }

    // Ingestion

    pub fn on_endpoint_change(&self, old: Option<Endpoint>, new: Option<Endpoint>) {
        self.index.update_endpoint(old, new);
    }

    pub fn on_device_inventory_change(&self, device: &DeviceId, inventory: Option<DeviceInventory>) {
        self.registry.on_inventory_change(device, inventory);
    }

    pub fn on_device_port_change(&self, device: &DeviceId, port: &PortId, info: Option<PortInfo>) {
        self.registry.on_port_change(device, port, info);
    }

    pub fn on_device_config_change(&self, device: &DeviceId, config: Option<DeviceConfig>) {
        self.registry.on_config_change(device, config);
    }

    /// Applies one event without flushing.
    pub fn apply(&self, event: ChangeEvent) {
        debug!("Applying {} event", event.label());
        match event {
            ChangeEvent::Endpoint { old, new } => self.on_endpoint_change(old, new),
            ChangeEvent::Inventory { device, inventory } => {
                self.on_device_inventory_change(&device, inventory)
            }
            ChangeEvent::Port { device, port, info } => {
                self.on_device_port_change(&device, &port, info)
            }
            ChangeEvent::Config { device, config } => {
                self.on_device_config_change(&device, config)
            }
        }
    }

    /// Applies `events` in order, then flushes.
    pub fn apply_batch(&self, events: Vec<ChangeEvent>) -> Vec<(DeviceId, SyncTicket)> {
        let count = events.len();
        for event in events {
            self.apply(event);
        }
        self.batches.fetch_add(1, Ordering::Relaxed);
        let tickets = self.flush();
        debug!("Applied batch of {} events, {} policies submitted", count, tickets.len());
        tickets
    }

    /// Recomputes the policy of every dirty device and submits those that
    /// changed since the last submission. A device that is no longer Ready
    /// is submitted with no `after`.
    pub fn flush(&self) -> Vec<(DeviceId, SyncTicket)> {
        let mut published = self.published.lock();
        let dirty = self.dirty.take();

        let mut tickets = Vec::new();
        for device in dirty {
            let after = DevicePolicy::build(&device, &self.registry, &self.index);
            let before = published.get(&device).cloned();
            if before == after {
                continue;
            }
            match &after {
                Some(policy) => {
                    published.insert(device.clone(), policy.clone());
                }
                None => {
                    published.remove(&device);
                }
            }
            self.policies_submitted.fetch_add(1, Ordering::Relaxed);
            let ticket = self.coalescer.submit(device.clone(), before, after);
            tickets.push((device, ticket));
        }
        tickets
    }

    /// Forgets the last policy submitted for `device` and marks it dirty, so
    /// the next flush pushes its current policy as a fresh `(None, after)`.
    ///
    /// A device whose current policy is `None` has nothing left to push.
    pub fn resync(&self, device: &DeviceId) {
        let forgotten = self.published.lock().remove(device).is_some();
        self.dirty.mark(device);
        warn!("Policy push for {} failed, resync on next flush", device);

        audit_log!(AuditRecord::new(
            AuditCategory::PolicySync,
            "PolicySyncDaemon",
            "policy_push_failed",
        )
        .with_object_id(device.as_str())
        .with_object_type("device")
        .with_details(serde_json::json!({ "published_dropped": forgotten }))
        .with_error("sync not applied"));
    }

    /// Last policy submitted for `device`.
    pub fn published_policy(&self, device: &DeviceId) -> Option<DevicePolicy> {
        self.published.lock().get(device).cloned()
    }

    /// Submits a pair directly, bypassing policy derivation.
    pub fn submit(
        &self,
        device: DeviceId,
        before: Option<DevicePolicy>,
        after: Option<DevicePolicy>,
    ) -> SyncTicket {
        self.coalescer.submit(device, before, after)
    }

    // Queries

    pub fn endpoints_for_device(&self, device: &DeviceId) -> Vec<Endpoint> {
        self.index.endpoints_for_device(device)
    }

    pub fn endpoints_for_group(&self, group: &EgKey) -> Vec<Endpoint> {
        self.index.endpoints_for_group(group)
    }

    pub fn is_ready(&self, device: &DeviceId) -> bool {
        self.registry.is_ready(device)
    }

    pub fn external_ports(&self, device: &DeviceId) -> BTreeSet<PortId> {
        self.registry.external_ports(device)
    }

    pub fn tunnel_port(&self, device: &DeviceId) -> Option<PortId> {
        self.registry.tunnel_port(device)
    }

    pub fn tunnel_ip(&self, device: &DeviceId) -> Option<IpAddr> {
        self.registry.tunnel_ip(device)
    }

    pub fn register_device_listener(&self, listener: Arc<dyn DeviceListener>) {
        self.registry.register_listener(listener);
    }

    pub fn register_endpoint_listener(&self, listener: Arc<dyn EndpointListener>) {
        self.index.register_listener(listener);
    }

    pub fn stats(&self) -> DaemonStats {
        DaemonStats {
            batches: self.batches.load(Ordering::Relaxed),
            policies_submitted: self.policies_submitted.load(Ordering::Relaxed),
            endpoints: self.index.stats(),
            devices: self.registry.stats(),
            coalescer: self.coalescer.stats(),
        }
    }

    /// Runs the event loop until `rx` closes or `shutdown` fires, then closes
    /// the coalescer.
    ///
    /// When `rx` closes the loop first waits for every submitted policy to
    /// resolve. Cancellation skips that wait.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<Vec<ChangeEvent>>,
        shutdown: CancellationToken,
    ) -> CloseOutcome {
        info!("Starting PolicySyncDaemon event loop");

        let record = AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "PolicySyncDaemon",
            "event_loop_started",
        )
        .with_outcome(AuditOutcome::Success)
        .with_details(serde_json::json!({
            "max_in_flight": self.coalescer.config().max_in_flight,
            "shutdown_timeout_ms": self.coalescer.config().shutdown_timeout.as_millis() as u64,
        }));
        audit_log!(record);

        // Tickets of submitted policies, reaped as they resolve. A failed
        // push re-marks its device for the next batch.
        let mut outstanding: JoinSet<(DeviceId, bool)> = JoinSet::new();
        let drained = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break false;
                }
                Some(result) = outstanding.join_next(), if !outstanding.is_empty() => {
                    if let Ok((device, false)) = result {
                        if !self.coalescer.is_closed() {
                            self.resync(&device);
                        }
                    }
                }
                batch = rx.recv() => match batch {
                    Some(events) => {
                        for (device, ticket) in self.apply_batch(events) {
                            outstanding.spawn(async move { (device, ticket.await) });
                        }
                    }
                    None => {
                        info!("Event channel closed");
                        break true;
                    }
                },
            }
        };

        // Channel closed: let submitted policies land unless cancelled.
        if drained && !outstanding.is_empty() {
            info!("Waiting for {} outstanding syncs", outstanding.len());
            tokio::select! {
                _ = shutdown.cancelled() => info!("Shutdown requested while draining"),
                _ = async { while outstanding.join_next().await.is_some() {} } => {}
            }
        }
        outstanding.abort_all();

        let outcome = self.coalescer.close().await;
        let stats = self.stats();
        info!("PolicySyncDaemon event loop stopped ({:?})", outcome);

        let stop_record = AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "PolicySyncDaemon",
            "event_loop_stopped",
        )
        .with_outcome(match outcome {
            CloseOutcome::ForcedCancel => AuditOutcome::Failure,
            _ => AuditOutcome::Success,
        })
        .with_details(serde_json::json!({
            "close_outcome": format!("{:?}", outcome),
            "batches": stats.batches,
            "policies_submitted": stats.policies_submitted,
            "syncs_applied": stats.coalescer.applied,
            "syncs_failed": stats.coalescer.failed,
        }));
        audit_log!(stop_record);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DryRunSynchronizer;
    use gbp_types::{Location, MacAddress};
    use pretty_assertions::assert_eq;

    fn daemon() -> PolicySyncDaemon<DryRunSynchronizer> {
        PolicySyncDaemon::new(&PolicySyncConfig::default(), Arc::new(DryRunSynchronizer::new()))
            .unwrap()
    }

    fn ready(device: &str) -> ChangeEvent {
        ChangeEvent::Inventory {
            device: DeviceId::new(device),
            inventory: Some(DeviceInventory::new().with_port(PortInfo::named("p1", "eth0_vxlan3"))),
        }
    }

    #[tokio::test]
    async fn test_flush_submits_only_changed_policies() {
        let daemon = daemon();

        let tickets = daemon.apply_batch(vec![ready("sw1")]);
        assert_eq!(tickets.len(), 1);
        for (_, ticket) in tickets {
            assert!(ticket.await);
        }

        // Same inventory again: device is dirty but its policy is unchanged.
        assert!(daemon.apply_batch(vec![ready("sw1")]).is_empty());
        assert_eq!(daemon.stats().policies_submitted, 1);
    }

    #[tokio::test]
    async fn test_endpoint_arrival_dirties_device() {
        let daemon = daemon();
        daemon.apply_batch(vec![ready("sw1")]);

        let ep = Endpoint::new(gbp_types::EpKey::new("ctx1", MacAddress::new([0, 0, 0, 0, 0, 1])))
            .with_location(Location::new("sw1", "port1"));
        let tickets = daemon.apply_batch(vec![ChangeEvent::Endpoint {
            old: None,
            new: Some(ep),
        }]);
        let devices: Vec<DeviceId> = tickets.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(devices, vec![DeviceId::new("sw1")]);
    }

    #[tokio::test]
    async fn test_endpoint_on_unready_device_submits_nothing() {
        let daemon = daemon();
        let ep = Endpoint::new(gbp_types::EpKey::new("ctx1", MacAddress::new([0, 0, 0, 0, 0, 1])))
            .with_location(Location::new("sw9", "port1"));
        let tickets = daemon.apply_batch(vec![ChangeEvent::Endpoint {
            old: None,
            new: Some(ep),
        }]);
        assert!(tickets.is_empty());
        assert_eq!(daemon.endpoints_for_device(&DeviceId::new("sw9")).len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = PolicySyncConfig::default();
        config.coalescer.max_in_flight = 0;
        let result = PolicySyncDaemon::new(&config, Arc::new(DryRunSynchronizer::new()));
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }
}
