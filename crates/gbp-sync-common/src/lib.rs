//! Common synchronization abstractions for group-based policy sync.
//!
//! This crate provides the pieces shared by every component that turns change
//! notifications into device configuration:
//!
//! - [`Change`]: Tagged created/updated/removed variant decoded once at the
//!   boundary from a `(before, after)` delta
//! - [`ConfigPair`]: The `(before, after)` unit of synchronization work
//! - [`PolicySynchronizer`]: Contract of the collaborator that applies a pair
//!   to a device
//! - [`SyncCoalescer`]: Per-target single-flight pipeline that merges bursts
//!   of submissions into one net pair
//! - [`SyncError`] / [`SyncStatus`]: Failure taxonomy for synchronization
//!
//! # Example
//!
//! ```ignore
//! use gbp_sync_common::{SyncCoalescer, SyncCoalescerConfig};
//!
//! let coalescer = SyncCoalescer::new(synchronizer, SyncCoalescerConfig::default());
//!
//! // Three rapid updates for the same device collapse into (v0, v3).
//! let t1 = coalescer.submit(device.clone(), Some(v0), Some(v1));
//! let t2 = coalescer.submit(device.clone(), Some(v1), Some(v2));
//! let t3 = coalescer.submit(device, Some(v2), Some(v3));
//!
//! assert!(t1.await && t2.await && t3.await);
//! ```

mod change;
mod coalescer;
mod error;
mod synchronizer;

pub use change::Change;
pub use coalescer::{
    CloseOutcome, SyncCoalescer, SyncCoalescerConfig, SyncCoalescerStats, SyncTicket,
};
pub use error::{SyncError, SyncResult, SyncStatus};
pub use synchronizer::{ConfigPair, PolicySynchronizer};
