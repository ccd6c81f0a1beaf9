//! Synchronizer contract and the unit of synchronization work.

use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;

use crate::{Change, SyncResult};

/// `(before, after)` snapshot of a target's desired configuration.
///
/// `version` is the coalescer-wide sequence number of the newest submission
/// merged into this pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPair<C> {
    pub before: Option<C>,
    pub after: Option<C>,
    pub version: u64,
}

impl<C> ConfigPair<C> {
    /// Creates a new pair.
    pub fn new(before: Option<C>, after: Option<C>, version: u64) -> Self {
        Self {
            before,
            after,
            version,
        }
    }

    /// Folds a newer submission into this pair.
    ///
    /// The original `before` is kept; the intermediate `after` is discarded.
    pub fn merge(&mut self, after: Option<C>, version: u64) {
        self.after = after;
        self.version = version;
    }

    /// Decodes the pair into a [`Change`]; `None` if both sides are absent.
    pub fn into_change(self) -> Option<Change<C>> {
        Change::from_delta(self.before, self.after)
    }
}

/// Applies a merged configuration pair to a device.
///
/// Implementations must tolerate repeated calls for the same target and must
/// not assume any ordering relative to other targets. The coalescer never runs
/// two calls for the same target concurrently.
///
/// Returning `Ok(false)` means the synchronizer ran but did not apply the
/// pair; `Err` means it failed. Both resolve the callers' tickets to `false`.
#[async_trait]
pub trait PolicySynchronizer: Send + Sync + 'static {
    /// Identity of a synchronization target (usually a device id).
    type Target: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Configuration snapshot type.
    type Config: Send + Sync + 'static;

    /// Returns the name of this synchronizer (for logging).
    fn name(&self) -> &str {
        "PolicySynchronizer"
    }

    /// Applies the net effect of `pair` to `target`.
    async fn sync_policy(
        &self,
        target: &Self::Target,
        pair: ConfigPair<Self::Config>,
    ) -> SyncResult<bool>;
}
