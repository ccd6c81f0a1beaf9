//! Integration tests for policysyncd
//!
//! These tests drive the daemon end to end: change events go in through
//! `apply_batch` or the event loop, and a recording synchronizer captures the
//! `(before, after)` policy pairs that come out.

use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gbp_sync_common::{CloseOutcome, ConfigPair, PolicySynchronizer, SyncError, SyncResult, SyncTicket};
use gbp_types::{DeviceId, EgKey, Endpoint, EpKey, Location, MacAddress, PortId};
use policysyncd::device::{DeviceConfig, DeviceInventory, PortInfo};
use policysyncd::{
    ChangeEvent, DeviceListener, DevicePolicy, DeviceStatus, PolicySyncConfig, PolicySyncDaemon,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Call = (DeviceId, Option<DevicePolicy>, Option<DevicePolicy>);

/// Mock synchronizer for testing
///
/// Records every pair it receives. Devices whose id starts with "bad" always
/// fail; devices starting with "flaky" fail their first call only.
#[derive(Default)]
struct RecordingSynchronizer {
    calls: Mutex<Vec<Call>>,
    failed_once: Mutex<HashSet<DeviceId>>,
}

impl RecordingSynchronizer {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, device: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|(d, _, _)| d.as_str() == device)
            .collect()
    }
}

#[async_trait]
impl PolicySynchronizer for RecordingSynchronizer {
    type Target = DeviceId;
    type Config = DevicePolicy;

    fn name(&self) -> &str {
        "RecordingSynchronizer"
    }

    async fn sync_policy(
        &self,
        target: &DeviceId,
        pair: ConfigPair<DevicePolicy>,
    ) -> SyncResult<bool> {
        self.calls
            .lock()
            .unwrap()
            .push((target.clone(), pair.before, pair.after));
        if target.as_str().starts_with("bad") {
            return Err(SyncError::unreachable(target.as_str(), "connection refused"));
        }
        if target.as_str().starts_with("flaky")
            && self.failed_once.lock().unwrap().insert(target.clone())
        {
            return Err(SyncError::unreachable(target.as_str(), "connection reset"));
        }
        Ok(true)
    }
}

#[derive(Default)]
struct RemovalListener {
    removed: Mutex<Vec<DeviceId>>,
}

impl DeviceListener for RemovalListener {
    fn on_device_removed(&self, device: &DeviceId) {
        self.removed.lock().unwrap().push(device.clone());
    }
}

fn new_daemon() -> (PolicySyncDaemon<RecordingSynchronizer>, Arc<RecordingSynchronizer>) {
    let sync = Arc::new(RecordingSynchronizer::default());
    let daemon = PolicySyncDaemon::new(&PolicySyncConfig::default(), sync.clone()).unwrap();
    (daemon, sync)
}

fn mac(n: u8) -> MacAddress {
    MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, n])
}

fn endpoint(n: u8, device: &str) -> Endpoint {
    Endpoint::new(EpKey::new("ctx1", mac(n)))
        .with_location(Location::new(device, "port1"))
        .with_group(EgKey::new("tenantA", "grpX"))
}

fn inventory(device: &str, ports: &[&str]) -> ChangeEvent {
    ChangeEvent::Inventory {
        device: DeviceId::new(device),
        inventory: Some(
            ports
                .iter()
                .fold(DeviceInventory::new(), |inv, p| inv.with_port(PortInfo::named(*p, *p))),
        ),
    }
}

fn removal(device: &str) -> ChangeEvent {
    ChangeEvent::Inventory {
        device: DeviceId::new(device),
        inventory: None,
    }
}

async fn settle(tickets: Vec<(DeviceId, SyncTicket)>) -> Vec<(DeviceId, bool)> {
    let mut results = Vec::new();
    for (device, ticket) in tickets {
        results.push((device, ticket.await));
    }
    results
}

#[tokio::test]
async fn test_tunnel_port_and_removal() {
    let (daemon, _sync) = new_daemon();
    let listener = Arc::new(RemovalListener::default());
    daemon.register_device_listener(listener.clone());
    let sw1 = DeviceId::new("sw1");

    settle(daemon.apply_batch(vec![inventory("sw1", &["eth0", "eth0_vxlan3"])])).await;
    assert_eq!(daemon.tunnel_port(&sw1), Some(PortId::new("eth0_vxlan3")));
    assert!(daemon.is_ready(&sw1));

    settle(daemon.apply_batch(vec![removal("sw1")])).await;
    assert!(!daemon.is_ready(&sw1));
    assert_eq!(*listener.removed.lock().unwrap(), vec![sw1]);
}

#[tokio::test]
async fn test_group_membership_follows_location() {
    let (daemon, _sync) = new_daemon();
    let group = EgKey::new("tenantA", "grpX");
    let e1 = endpoint(1, "sw1");

    daemon.apply_batch(vec![ChangeEvent::Endpoint {
        old: None,
        new: Some(e1.clone()),
    }]);
    assert_eq!(daemon.endpoints_for_group(&group), vec![e1.clone()]);

    let unlocated = Endpoint {
        location: None,
        ..e1.clone()
    };
    daemon.apply_batch(vec![ChangeEvent::Endpoint {
        old: Some(e1),
        new: Some(unlocated),
    }]);
    assert!(daemon.endpoints_for_group(&group).is_empty());
    assert!(daemon.endpoints_for_device(&DeviceId::new("sw1")).is_empty());
}

#[tokio::test]
async fn test_policy_pairs_end_to_end() {
    let (daemon, sync) = new_daemon();

    let results = settle(daemon.apply_batch(vec![
        inventory("sw1", &["eth0_vxlan3"]),
        inventory("sw2", &["eth1_tun7"]),
    ]))
    .await;
    assert_eq!(
        results,
        vec![(DeviceId::new("sw1"), true), (DeviceId::new("sw2"), true)]
    );

    // Endpoint arrives on sw1.
    let on_sw1 = endpoint(1, "sw1");
    settle(daemon.apply_batch(vec![ChangeEvent::Endpoint {
        old: None,
        new: Some(on_sw1.clone()),
    }]))
    .await;

    // Endpoint moves to sw2: both devices get a new policy.
    let on_sw2 = endpoint(1, "sw2");
    let moved = settle(daemon.apply_batch(vec![ChangeEvent::Endpoint {
        old: Some(on_sw1.clone()),
        new: Some(on_sw2.clone()),
    }]))
    .await;
    assert_eq!(moved.len(), 2);

    // sw1 leaves inventory.
    settle(daemon.apply_batch(vec![removal("sw1")])).await;

    let sw1_calls = sync.calls_for("sw1");
    assert_eq!(sw1_calls.len(), 4);

    let (_, before, after) = &sw1_calls[0];
    assert!(before.is_none());
    let created = after.as_ref().unwrap();
    assert_eq!(created.tunnel_port, Some(PortId::new("eth0_vxlan3")));
    assert!(created.endpoints.is_empty());

    let (_, _, after) = &sw1_calls[1];
    assert_eq!(after.as_ref().unwrap().endpoints, vec![on_sw1]);

    let (_, _, after) = &sw1_calls[2];
    assert!(after.as_ref().unwrap().endpoints.is_empty());

    let (_, before, after) = &sw1_calls[3];
    assert!(before.is_some());
    assert!(after.is_none());

    let sw2_calls = sync.calls_for("sw2");
    let (_, _, after) = sw2_calls.last().unwrap();
    assert_eq!(after.as_ref().unwrap().endpoints, vec![on_sw2]);
}

#[tokio::test]
async fn test_burst_coalesces_into_one_pair() {
    let (daemon, sync) = new_daemon();
    let sw1 = DeviceId::new("sw1");
    let policy = |n: usize| DevicePolicy {
        device: sw1.clone(),
        tunnel_port: None,
        tunnel_ip: None,
        external_ports: Default::default(),
        endpoints: (0..n).map(|i| endpoint(i as u8, "sw1")).collect(),
    };

    // Submitted back to back from one task, before the dispatcher can run.
    let t0 = daemon.submit(sw1.clone(), Some(policy(0)), Some(policy(1)));
    let t1 = daemon.submit(sw1.clone(), Some(policy(1)), Some(policy(2)));
    let t2 = daemon.submit(sw1.clone(), Some(policy(2)), Some(policy(3)));
    assert!(t0.await);
    assert!(t1.await);
    assert!(t2.await);

    assert_eq!(sync.calls(), vec![(sw1.clone(), Some(policy(0)), Some(policy(3)))]);
}

#[tokio::test]
async fn test_failed_sync_is_isolated() {
    let (daemon, _sync) = new_daemon();

    let results = settle(daemon.apply_batch(vec![
        inventory("bad1", &["eth0"]),
        inventory("sw1", &["eth0"]),
    ]))
    .await;
    assert_eq!(
        results,
        vec![(DeviceId::new("bad1"), false), (DeviceId::new("sw1"), true)]
    );
    assert_eq!(daemon.stats().coalescer.failed, 1);
    assert_eq!(daemon.stats().coalescer.applied, 1);
}

#[tokio::test]
async fn test_external_ports_from_config() {
    let (daemon, sync) = new_daemon();
    let sw1 = DeviceId::new("sw1");

    settle(daemon.apply_batch(vec![
        ChangeEvent::Config {
            device: sw1.clone(),
            config: Some(
                DeviceConfig::default()
                    .with_external_interface("ext\\d+")
                    .with_tunnel_ip("192.0.2.1".parse().unwrap()),
            ),
        },
        inventory("sw1", &["ext1", "ext22", "eth0"]),
    ]))
    .await;

    let expected: Vec<PortId> = vec![PortId::new("ext1"), PortId::new("ext22")];
    assert_eq!(daemon.external_ports(&sw1).into_iter().collect::<Vec<_>>(), expected);

    let (_, _, after) = sync.calls().pop().unwrap();
    assert_eq!(after.unwrap().tunnel_ip, Some("192.0.2.1".parse().unwrap()));
}

#[tokio::test]
async fn test_event_loop_drains_on_channel_close() {
    let sync = Arc::new(RecordingSynchronizer::default());
    let daemon = Arc::new(PolicySyncDaemon::new(&PolicySyncConfig::default(), sync.clone()).unwrap());
    let (tx, rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();

    let runner = {
        let daemon = Arc::clone(&daemon);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { daemon.run(rx, shutdown).await })
    };

    tx.send(vec![inventory("sw1", &["eth0_vxlan3"])]).await.unwrap();
    tx.send(vec![ChangeEvent::Endpoint {
        old: None,
        new: Some(endpoint(1, "sw1")),
    }])
    .await
    .unwrap();
    drop(tx);

    let outcome = runner.await.unwrap();
    assert_eq!(outcome, CloseOutcome::Drained);
    assert_eq!(daemon.stats().batches, 2);
    assert!(!sync.calls().is_empty());
    let (_, _, after) = sync.calls().pop().unwrap();
    assert_eq!(after.unwrap().endpoints.len(), 1);

    // Closed coalescer rejects further work.
    let ticket = daemon.submit(DeviceId::new("sw1"), None, None);
    assert!(!ticket.await);
}

#[tokio::test]
async fn test_event_loop_resyncs_failed_push() {
    let sync = Arc::new(RecordingSynchronizer::default());
    let daemon = Arc::new(PolicySyncDaemon::new(&PolicySyncConfig::default(), sync.clone()).unwrap());
    let (tx, rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let flaky1 = DeviceId::new("flaky1");

    let runner = {
        let daemon = Arc::clone(&daemon);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { daemon.run(rx, shutdown).await })
    };

    tx.send(vec![inventory("flaky1", &["eth0_vxlan3"])]).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while sync.calls_for("flaky1").is_empty() || daemon.published_policy(&flaky1).is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Any later batch flushes the device again.
    tx.send(Vec::new()).await.unwrap();
    drop(tx);
    assert_eq!(runner.await.unwrap(), CloseOutcome::Drained);

    let calls = sync.calls_for("flaky1");
    assert_eq!(calls.len(), 2);
    let (_, before, after) = &calls[1];
    assert!(before.is_none());
    assert_eq!(
        after.as_ref().unwrap().tunnel_port,
        Some(PortId::new("eth0_vxlan3"))
    );
    assert!(daemon.published_policy(&flaky1).is_some());
    assert_eq!(daemon.stats().coalescer.failed, 1);
}

#[tokio::test]
async fn test_event_loop_stops_on_cancel() {
    let (daemon, _sync) = new_daemon();
    let daemon = Arc::new(daemon);
    let (_tx, rx) = mpsc::channel::<Vec<ChangeEvent>>(4);
    let shutdown = CancellationToken::new();

    let runner = {
        let daemon = Arc::clone(&daemon);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { daemon.run(rx, shutdown).await })
    };
    shutdown.cancel();

    assert_eq!(runner.await.unwrap(), CloseOutcome::Drained);
    assert!(daemon.coalescer().is_closed());
}

#[tokio::test]
async fn test_config_file_drives_readiness() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[registry]\nrequired_capabilities = [\"flow\"]\n\n[coalescer]\nmax_in_flight = 1"
    )
    .unwrap();
    let config = PolicySyncConfig::load(file.path()).unwrap();

    let sync = Arc::new(RecordingSynchronizer::default());
    let daemon = PolicySyncDaemon::new(&config, sync.clone()).unwrap();
    let sw1 = DeviceId::new("sw1");

    assert!(daemon.apply_batch(vec![inventory("sw1", &["eth0"])]).is_empty());
    assert_eq!(daemon.registry().status(&sw1), Some(DeviceStatus::Preparing));

    let ready = ChangeEvent::Inventory {
        device: sw1.clone(),
        inventory: Some(
            DeviceInventory::new()
                .with_port(PortInfo::new("eth0"))
                .with_capability("flow"),
        ),
    };
    let results = settle(daemon.apply_batch(vec![ready])).await;
    assert_eq!(results, vec![(sw1.clone(), true)]);
    assert_eq!(sync.calls().len(), 1);
}

#[tokio::test]
async fn test_replay_json_batches() {
    let json = r#"[
        [{"kind":"inventory","device":"sw1","inventory":{"ports":[{"id":"p1","name":"eth0_vxlan3"}]}}],
        [{"kind":"endpoint","new":{"key":{"l2_context":"ctx1","mac":"00:11:22:33:44:01"},
          "location":{"device":"sw1","port":"port1"},
          "group":{"tenant":"tenantA","group":"grpX"}}}]
    ]"#;
    let batches: Vec<Vec<ChangeEvent>> = serde_json::from_str(json).unwrap();
    let (daemon, _sync) = new_daemon();
    for batch in batches {
        settle(daemon.apply_batch(batch)).await;
    }

    assert_eq!(
        daemon.endpoints_for_group(&EgKey::new("tenantA", "grpX")),
        vec![endpoint(1, "sw1")]
    );
}
