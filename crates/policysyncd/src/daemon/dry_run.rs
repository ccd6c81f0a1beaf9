//! Synchronizer that only logs what it would push.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use gbp_sync_common::{Change, ConfigPair, PolicySynchronizer, SyncResult};
use gbp_types::DeviceId;
use tracing::info;

use super::policy::DevicePolicy;

/// Logs each merged pair and reports it as applied.
#[derive(Debug, Default)]
pub struct DryRunSynchronizer {
    pushes: AtomicU64,
}

impl DryRunSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pairs seen so far.
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PolicySynchronizer for DryRunSynchronizer {
    type Target = DeviceId;
    type Config = DevicePolicy;

    fn name(&self) -> &str {
        "DryRunSynchronizer"
    }

    async fn sync_policy(
        &self,
        target: &DeviceId,
        pair: ConfigPair<DevicePolicy>,
    ) -> SyncResult<bool> {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        let version = pair.version;

        let Some(change) = pair.into_change() else {
            return Ok(true);
        };
        let label = change.label();
        let endpoints = change.after().map(|p| p.endpoints.len()).unwrap_or(0);
        let policy = match &change {
            Change::Created(after) | Change::Updated { after, .. } => {
                serde_json::to_string(after).unwrap_or_default()
            }
            Change::Removed(_) => String::new(),
        };

        info!(
            device = %target,
            version,
            change = label,
            endpoints,
            policy = %policy,
            "dry-run policy push"
        );
        Ok(true)
    }
}
