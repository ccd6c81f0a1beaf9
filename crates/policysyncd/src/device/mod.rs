//! DeviceRegistry - device lifecycle tracking and port classification.
//!
//! Each device moves through a small state machine driven by inventory and
//! administrator configuration notifications:
//!
//! ```text
//!                inventory (caps missing)          caps present
//! Disconnected ───────────────────────────> Preparing ─────────> Ready
//!      ▲                                        ▲                  │ │
//!      │                                        └── caps lost ─────┘ │
//!      └──────────────── inventory removed (entry dropped) ──────────┘
//! ```
//!
//! With no required capabilities configured, Preparing collapses into Ready
//! within the same notification.

mod classify;
mod registry;
mod types;

pub use classify::{classify_ports, ExternalPatterns, PortClassification};
pub use registry::{DeviceRegistry, DeviceRegistryConfig, DeviceRegistryStats};
pub use types::{
    DeviceConfig, DeviceInventory, DeviceListener, DeviceSnapshot, DeviceStatus, PortInfo,
};
