//! Convenience re-exports for routing consumers.

pub use crate::error::{PickError, PickResult};
pub use crate::picker::PickerSnapshot;
pub use crate::topology::{Endpoint, EndpointAttributes, OwnershipKey, OwnershipMap, RoutingTable};
pub use crate::types::{Address, BucketRouting, RoutingHint};
pub use crate::vbucket::{vbucket_for_key, DEFAULT_NUM_VBUCKETS, MAX_NUM_VBUCKETS};
