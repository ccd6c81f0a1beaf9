//! Daemon - composition root and event loop.

mod dry_run;
mod event;
mod policy;
mod syncdaemon;

pub use dry_run::DryRunSynchronizer;
pub use event::{load_replay, ChangeEvent};
pub use policy::DevicePolicy;
pub use syncdaemon::{DaemonStats, PolicySyncDaemon};
