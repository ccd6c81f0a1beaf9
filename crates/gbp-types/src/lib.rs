//! Identity types for the group-based policy sync controller.
//!
//! This crate provides the keys every other component indexes by:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`EpKey`]: endpoint identity, `(l2 context, mac)`
//! - [`EgKey`]: endpoint-group identity, `(tenant, group)`
//! - [`DeviceId`] / [`PortId`]: opaque switch and port identifiers
//! - [`Location`]: the `(device, port)` an endpoint is attached to
//! - [`Endpoint`]: the endpoint record carried by change notifications

mod endpoint;
mod id;
mod mac;

pub use endpoint::{EgKey, Endpoint, EpKey, Location};
pub use id::{DeviceId, GroupId, L2ContextId, PortId, TenantId};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid endpoint key: {0} (expected <l2-context>/<mac>)")]
    InvalidEpKey(String),

    #[error("invalid endpoint-group key: {0} (expected <tenant>/<group>)")]
    InvalidEgKey(String),

    #[error("invalid location: {0} (expected <device>/<port>)")]
    InvalidLocation(String),

    #[error("identifier must not be empty")]
    EmptyIdentifier,
}
