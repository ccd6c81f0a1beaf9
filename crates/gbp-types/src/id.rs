//! Opaque string identifiers.
//!
//! The controller never interprets these values; it only hashes, compares and
//! prints them. Each one is a distinct type so a port id can't be passed where
//! a device id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a managed switch/node (e.g. `openflow:1`, `sw1`).
    DeviceId
);

string_id!(
    /// Identifier of a port on a device (node connector id).
    PortId
);

string_id!(
    /// Layer-2 bridge domain / flood domain an endpoint lives in.
    L2ContextId
);

string_id!(
    /// Tenant owning an endpoint group.
    TenantId
);

string_id!(
    /// Endpoint group id, unique within a tenant.
    GroupId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_conversions() {
        let id = DeviceId::from("sw1");
        assert_eq!(id.to_string(), "sw1");
        assert_eq!(id.as_str(), "sw1");
        assert_eq!(id, DeviceId::new(String::from("sw1")));
        assert!(!id.is_empty());
        assert!(PortId::from("").is_empty());
    }

    #[test]
    fn test_serde_transparent() {
        let port = PortId::from("openflow:1:3");
        assert_eq!(serde_json::to_string(&port).unwrap(), "\"openflow:1:3\"");
    }
}
