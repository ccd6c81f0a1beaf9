//! EndpointIndex - endpoint registry with reverse indexes.
//!
//! Endpoints are keyed by [`EpKey`](gbp_types::EpKey). Located endpoints are
//! additionally indexed by the device they are attached to and by their
//! endpoint group; unlocated endpoints are kept aside and appear in neither
//! reverse index.

mod index;
mod types;

pub use index::EndpointIndex;
pub use types::{EndpointIndexStats, EndpointListener};
