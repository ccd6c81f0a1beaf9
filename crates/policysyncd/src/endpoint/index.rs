//! EndpointIndex implementation.
//!
//! All records live in `by_key`. The reverse indexes hold keys only; readers
//! resolve each key through `by_key` and keep it only if the record still
//! points at the requested bucket, so an endpoint moving between devices is
//! never reported in both.
//!
//! Lock order is always `by_key` before any reverse index. Readers never hold
//! a reverse-index guard while touching `by_key`.

use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gbp_sync_common::Change;
use gbp_types::{DeviceId, EgKey, Endpoint, EpKey};
use log::debug;
use parking_lot::RwLock;

use super::types::{EndpointIndexStats, EndpointListener};

#[derive(Default)]
struct Counters {
    creates: AtomicU64,
    updates: AtomicU64,
    removals: AtomicU64,
    ignored: AtomicU64,
}

/// An effective change to one key.
struct Applied {
    key: EpKey,
    previous: Option<Endpoint>,
    current: Option<Endpoint>,
}

/// Concurrent endpoint registry indexed by key, device and group.
#[derive(Default)]
pub struct EndpointIndex {
    by_key: DashMap<EpKey, Endpoint>,
    by_device: DashMap<DeviceId, HashSet<EpKey>>,
    by_group: DashMap<EgKey, HashSet<EpKey>>,
    unlocated_by_group: DashMap<EgKey, HashSet<EpKey>>,
    listeners: RwLock<Vec<Arc<dyn EndpointListener>>>,
    counters: Counters,
}

impl std::fmt::Debug for EndpointIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointIndex")
            .field("endpoints", &self.by_key.len())
            .field("devices", &self.by_device.len())
            .field("groups", &self.by_group.len())
            .finish()
    }
}

fn located_group(endpoint: &Endpoint) -> Option<&EgKey> {
    endpoint.location.as_ref().and(endpoint.group.as_ref())
}

fn unlocated_group(endpoint: &Endpoint) -> Option<&EgKey> {
    match endpoint.location {
        Some(_) => None,
        None => endpoint.group.as_ref(),
    }
}

fn link<K: Eq + Hash + Clone>(index: &DashMap<K, HashSet<EpKey>>, bucket: &K, key: &EpKey) {
    index.entry(bucket.clone()).or_default().insert(key.clone());
}

fn unlink<K: Eq + Hash + Clone>(index: &DashMap<K, HashSet<EpKey>>, bucket: &K, key: &EpKey) {
    if let Entry::Occupied(mut entry) = index.entry(bucket.clone()) {
        entry.get_mut().remove(key);
        if entry.get().is_empty() {
            entry.remove();
        }
    }
}

/// Moves `key` between buckets. The new bucket is linked first.
fn move_bucket<K: Eq + Hash + Clone>(
    index: &DashMap<K, HashSet<EpKey>>,
    key: &EpKey,
    from: Option<&K>,
    to: Option<&K>,
) {
    if from == to {
        return;
    }
    if let Some(to) = to {
        link(index, to, key);
    }
    if let Some(from) = from {
        unlink(index, from, key);
    }
}

impl EndpointIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Listeners are invoked in registration order.
    pub fn register_listener(&self, listener: Arc<dyn EndpointListener>) {
        self.listeners.write().push(listener);
    }

    /// Applies an endpoint change notification. This is the only mutator.
    ///
    /// `(None, None)` is a no-op. Removing an endpoint that is not indexed is
    /// a no-op. A new record whose location names an empty device is dropped
    /// as malformed.
    pub fn update_endpoint(&self, old: Option<Endpoint>, new: Option<Endpoint>) {
        let Some(change) = Change::from_delta(old, new) else {
            self.ignore("endpoint notification without old or new record");
            return;
        };
        if let Some(after) = change.after() {
            if after.device().is_some_and(DeviceId::is_empty) {
                self.ignore("endpoint notification with empty device id");
                return;
            }
        }

        let applied = match change {
            Change::Updated { before, after } if before.key != after.key => {
                let key = after.key.clone();
                vec![self.write(&before.key, None), self.write(&key, Some(after))]
            }
            Change::Created(after) | Change::Updated { after, .. } => {
                let key = after.key.clone();
                vec![self.write(&key, Some(after))]
            }
            Change::Removed(before) => vec![self.write(&before.key, None)],
        };

        for applied in applied {
            match applied {
                Some(applied) => self.notify(&applied),
                None => self.ignore("endpoint notification with no effect"),
            }
        }
    }

    /// Writes one key while holding its `by_key` entry, so readers of that
    /// key see either the old or the new record.
    fn write(&self, key: &EpKey, new: Option<Endpoint>) -> Option<Applied> {
        let previous = match self.by_key.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if new.as_ref() == Some(slot.get()) {
                    return None;
                }
                let previous = slot.get().clone();
                self.reindex(key, Some(&previous), new.as_ref());
                match &new {
                    Some(endpoint) => {
                        slot.insert(endpoint.clone());
                    }
                    None => {
                        slot.remove();
                    }
                }
                Some(previous)
            }
            Entry::Vacant(slot) => {
                let endpoint = new.as_ref()?;
                self.reindex(key, None, Some(endpoint));
                slot.insert(endpoint.clone());
                None
            }
        };

        Some(Applied {
            key: key.clone(),
            previous,
            current: new,
        })
    }

    fn reindex(&self, key: &EpKey, old: Option<&Endpoint>, new: Option<&Endpoint>) {
        move_bucket(
            &self.by_device,
            key,
            old.and_then(Endpoint::device),
            new.and_then(Endpoint::device),
        );
        move_bucket(
            &self.by_group,
            key,
            old.and_then(located_group),
            new.and_then(located_group),
        );
        move_bucket(
            &self.unlocated_by_group,
            key,
            old.and_then(unlocated_group),
            new.and_then(unlocated_group),
        );
    }

    fn notify(&self, applied: &Applied) {
        let (counter, label) = match (&applied.previous, &applied.current) {
            (None, _) => (&self.counters.creates, "created"),
            (_, None) => (&self.counters.removals, "removed"),
            _ => (&self.counters.updates, "updated"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!("Endpoint {} {}", applied.key, label);

        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }

        let records = [applied.previous.as_ref(), applied.current.as_ref()];
        let devices: BTreeSet<&DeviceId> = records
            .iter()
            .flatten()
            .filter_map(|e| e.device())
            .collect();
        let groups: BTreeSet<&EgKey> = records
            .iter()
            .flatten()
            .filter_map(|e| e.group.as_ref())
            .collect();

        for listener in &listeners {
            listener.on_endpoint_updated(&applied.key);
            for device in &devices {
                listener.on_device_endpoint_updated(device, &applied.key);
            }
            for group in &groups {
                listener.on_group_endpoint_updated(group, &applied.key);
            }
        }
    }

    fn ignore(&self, reason: &str) {
        debug!("Ignoring {}", reason);
        self.counters.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the keys in `bucket`, resolved through `by_key` and
    /// filtered by `keep`. Sorted by key.
    fn resolve<K: Eq + Hash>(
        &self,
        index: &DashMap<K, HashSet<EpKey>>,
        bucket: &K,
        keep: impl Fn(&Endpoint) -> bool,
    ) -> Vec<Endpoint> {
        let mut keys: Vec<EpKey> = index
            .get(bucket)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys.iter()
            .filter_map(|k| self.by_key.get(k).map(|e| e.value().clone()))
            .filter(|e| keep(e))
            .collect()
    }

    /// Looks up one endpoint, located or not.
    pub fn endpoint(&self, key: &EpKey) -> Option<Endpoint> {
        self.by_key.get(key).map(|e| e.value().clone())
    }

    /// All endpoints, sorted by key.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut all: Vec<Endpoint> = self.by_key.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Endpoints located on `device`; empty for an unknown device.
    pub fn endpoints_for_device(&self, device: &DeviceId) -> Vec<Endpoint> {
        self.resolve(&self.by_device, device, |e| e.device() == Some(device))
    }

    /// Located endpoints in `group`; empty for an unknown group.
    pub fn endpoints_for_group(&self, group: &EgKey) -> Vec<Endpoint> {
        self.resolve(&self.by_group, group, |e| located_group(e) == Some(group))
    }

    /// Endpoints in `group` that have no location.
    pub fn unlocated_endpoints_for_group(&self, group: &EgKey) -> Vec<Endpoint> {
        self.resolve(&self.unlocated_by_group, group, |e| {
            unlocated_group(e) == Some(group)
        })
    }

    /// Located endpoints on `device` that belong to `group`.
    pub fn endpoints_for_device_group(&self, device: &DeviceId, group: &EgKey) -> Vec<Endpoint> {
        self.endpoints_for_device(device)
            .into_iter()
            .filter(|e| e.group.as_ref() == Some(group))
            .collect()
    }

    /// Groups with at least one endpoint on `device`, sorted.
    pub fn groups_for_device(&self, device: &DeviceId) -> Vec<EgKey> {
        let groups: BTreeSet<EgKey> = self
            .endpoints_for_device(device)
            .into_iter()
            .filter_map(|e| e.group)
            .collect();
        groups.into_iter().collect()
    }

    /// Devices with at least one endpoint in `group`, sorted.
    pub fn devices_for_group(&self, group: &EgKey) -> Vec<DeviceId> {
        let devices: BTreeSet<DeviceId> = self
            .endpoints_for_group(group)
            .into_iter()
            .filter_map(|e| e.location.map(|l| l.device))
            .collect();
        devices.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn stats(&self) -> EndpointIndexStats {
        EndpointIndexStats {
            creates: self.counters.creates.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            removals: self.counters.removals.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
        }
    }
}
