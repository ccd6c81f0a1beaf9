//! policysyncd - group-based policy to device synchronization.
//!
//! Watches endpoint and device change notifications, keeps queryable indexes
//! over them and pushes per-device policy to a [`PolicySynchronizer`] with at
//! most one push in flight per device.
//!
//! # Architecture
//!
//! ```text
//! [ChangeEvent source]
//!        │
//!        ▼
//! [PolicySyncDaemon] ──┬──> [EndpointIndex]  ──┐
//!                      └──> [DeviceRegistry] ──┤ listeners
//!                                              ▼
//!                                       [DirtyDevices]
//!                                              │ flush
//!                                              ▼
//!                      [SyncCoalescer] ──> [PolicySynchronizer]
//! ```
//!
//! # Key Components
//!
//! - [`endpoint::EndpointIndex`]: endpoints by key, device and group
//! - [`device::DeviceRegistry`]: device lifecycle and port classification
//! - [`daemon::PolicySyncDaemon`]: composition root and event loop
//!
//! [`PolicySynchronizer`]: gbp_sync_common::PolicySynchronizer

pub mod audit;
pub mod config;
pub mod daemon;
pub mod device;
pub mod endpoint;
pub mod error;

pub use config::PolicySyncConfig;
pub use daemon::{ChangeEvent, DevicePolicy, DryRunSynchronizer, PolicySyncDaemon};
pub use device::{DeviceListener, DeviceRegistry, DeviceStatus};
pub use endpoint::{EndpointIndex, EndpointListener};
pub use error::{ConfigError, DaemonError};
