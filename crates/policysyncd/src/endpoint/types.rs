//! Endpoint index listener and statistics.

use gbp_types::{DeviceId, EgKey, EpKey};

/// Receives endpoint change notifications.
///
/// Invoked after the index has released its locks. On a move both the old
/// and new device (and group) are notified.
pub trait EndpointListener: Send + Sync {
    /// The endpoint record changed.
    fn on_endpoint_updated(&self, _key: &EpKey) {}

    /// An endpoint attached to `device` changed, arrived or left.
    fn on_device_endpoint_updated(&self, _device: &DeviceId, _key: &EpKey) {}

    /// An endpoint in `group` changed, joined or left.
    fn on_group_endpoint_updated(&self, _group: &EgKey, _key: &EpKey) {}
}

/// Statistics for EndpointIndex operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointIndexStats {
    /// Endpoints added.
    pub creates: u64,
    /// Endpoints replaced by a different record.
    pub updates: u64,
    /// Endpoints removed.
    pub removals: u64,
    /// Malformed, duplicate or no-op notifications.
    pub ignored: u64,
}
