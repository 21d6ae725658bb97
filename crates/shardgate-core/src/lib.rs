//! # Shardgate Core
//!
//! Runtime-free routing primitives shared by the shardgate client:
//!
//! - **Addresses and hints**: `host:port` endpoints and the per-call
//!   bucket/key routing hint
//! - **Vbucket hashing**: the CRC32 key → vbucket function used by the service
//! - **Ownership**: per `(bucket, address)` vbucket ownership as streamed by
//!   each node, aggregated into immutable routing tables
//! - **Picker snapshots**: O(1) bucket/vbucket → connection lookup with a
//!   round-robin fallback
//!
//! Everything here is generic over the connection type, so routing decisions
//! can be exercised without a network.
//!
//! ## Quick Start
//!
//! ```rust
//! use shardgate_core::prelude::*;
//!
//! let mut ownership = OwnershipMap::new();
//! ownership.apply(
//!     OwnershipKey::new("orders", Address::new("10.0.0.1:18098")),
//!     BucketRouting::new(4, vec![0, 1]),
//! );
//! ownership.apply(
//!     OwnershipKey::new("orders", Address::new("10.0.0.2:18098")),
//!     BucketRouting::new(4, vec![2, 3]),
//! );
//!
//! let table = RoutingTable::new(vec![
//!     Endpoint::new(Address::new("10.0.0.1:18098"), "a1", ownership.attributes_for(&Address::new("10.0.0.1:18098"))),
//!     Endpoint::new(Address::new("10.0.0.2:18098"), "a2", ownership.attributes_for(&Address::new("10.0.0.2:18098"))),
//! ]);
//!
//! let snapshot = PickerSnapshot::build(&table, |_| true);
//! assert_eq!(snapshot.owner_of("orders", 2), Some(&"a2"));
//! ```

pub mod error;
pub mod picker;
pub mod topology;
pub mod types;
pub mod vbucket;
pub mod prelude;

pub use error::{PickError, PickResult};
pub use picker::PickerSnapshot;
pub use topology::{Endpoint, EndpointAttributes, OwnershipKey, OwnershipMap, RoutingTable};
pub use types::{Address, BucketRouting, RoutingHint};
pub use vbucket::{vbucket_for_key, DEFAULT_NUM_VBUCKETS, MAX_NUM_VBUCKETS};
