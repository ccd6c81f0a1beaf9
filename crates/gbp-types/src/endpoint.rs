//! Endpoint identity and the endpoint record.

use crate::{DeviceId, GroupId, L2ContextId, MacAddress, ParseError, PortId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Endpoint identity: `(l2 context, mac)`.
///
/// Textual form is `<l2-context>/<mac>`.
///
/// ```
/// use gbp_types::EpKey;
///
/// let key: EpKey = "ctx1/00:11:22:33:44:55".parse().unwrap();
/// assert_eq!(key.l2_context.as_str(), "ctx1");
/// assert_eq!(key.to_string(), "ctx1/00:11:22:33:44:55");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpKey {
    pub l2_context: L2ContextId,
    pub mac: MacAddress,
}

impl EpKey {
    pub fn new(l2_context: impl Into<L2ContextId>, mac: MacAddress) -> Self {
        Self {
            l2_context: l2_context.into(),
            mac,
        }
    }
}

impl fmt::Display for EpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.l2_context, self.mac)
    }
}

impl FromStr for EpKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ctx, mac) = s
            .split_once('/')
            .ok_or_else(|| ParseError::InvalidEpKey(s.to_string()))?;
        if ctx.is_empty() {
            return Err(ParseError::InvalidEpKey(s.to_string()));
        }
        Ok(Self::new(ctx, mac.parse()?))
    }
}

/// Endpoint-group identity: `(tenant, group)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EgKey {
    pub tenant: TenantId,
    pub group: GroupId,
}

impl EgKey {
    pub fn new(tenant: impl Into<TenantId>, group: impl Into<GroupId>) -> Self {
        Self {
            tenant: tenant.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for EgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.group)
    }
}

impl FromStr for EgKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((tenant, group)) if !tenant.is_empty() && !group.is_empty() => {
                Ok(Self::new(tenant, group))
            }
            _ => Err(ParseError::InvalidEgKey(s.to_string())),
        }
    }
}

/// Where an endpoint is attached: a port on a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub device: DeviceId,
    pub port: PortId,
}

impl Location {
    pub fn new(device: impl Into<DeviceId>, port: impl Into<PortId>) -> Self {
        Self {
            device: device.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.port)
    }
}

impl FromStr for Location {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((device, port)) if !device.is_empty() && !port.is_empty() => {
                Ok(Self::new(device, port))
            }
            _ => Err(ParseError::InvalidLocation(s.to_string())),
        }
    }
}

/// An endpoint as delivered by the change-event source.
///
/// Records are immutable values: an update is a whole new record, never an
/// in-place edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub key: EpKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<EgKey>,
}

impl Endpoint {
    /// Creates an endpoint with neither location nor group.
    pub fn new(key: EpKey) -> Self {
        Self {
            key,
            location: None,
            group: None,
        }
    }

    /// Sets the location (builder pattern).
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the group (builder pattern).
    pub fn with_group(mut self, group: EgKey) -> Self {
        self.group = Some(group);
        self
    }

    /// Device the endpoint is attached to, if located.
    pub fn device(&self) -> Option<&DeviceId> {
        self.location.as_ref().map(|l| &l.device)
    }
}
