//! Core types for shard-aware routing.
//!
//! This module defines the identifiers that flow between name resolution,
//! the topology resolver and the picker: node addresses, per-call routing
//! hints and the vbucket ownership reported for one bucket on one node.

use crate::vbucket::MAX_NUM_VBUCKETS;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A resolvable `host:port` endpoint of a service node.
///
/// Addresses are compared by string equality. IPv6 hosts are bracketed,
/// e.g. `[::1]:18098`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create an address from an already formatted `host:port` string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Create an address from a host and port.
    ///
    /// Hosts containing a colon are treated as IPv6 literals and bracketed.
    pub fn from_host_port(host: &str, port: u16) -> Self {
        if host.contains(':') && !host.starts_with('[') {
            Self(format!("[{}]:{}", host, port))
        } else {
            Self(format!("{}:{}", host, port))
        }
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        // SocketAddr's Display already brackets IPv6 hosts.
        Self(addr.to_string())
    }
}

impl From<&str> for Address {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bucket name and raw key attached to a call for shard-aware routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingHint {
    /// The bucket the key lives in.
    pub bucket_name: String,
    /// The raw document key.
    pub key: Vec<u8>,
}

impl RoutingHint {
    /// Create a routing hint for a key in a bucket.
    pub fn new(bucket_name: impl Into<String>, key: impl AsRef<[u8]>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            key: key.as_ref().to_vec(),
        }
    }
}

/// Vbuckets one node serves locally for one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BucketRouting {
    /// Declared number of vbuckets in the bucket.
    pub num_vbuckets: u32,
    /// Vbucket ids that are local to the node.
    pub local_vbuckets: Vec<u32>,
}

impl BucketRouting {
    /// Create bucket routing from a vbucket count and the local vbucket ids.
    pub fn new(num_vbuckets: u32, local_vbuckets: Vec<u32>) -> Self {
        Self {
            num_vbuckets,
            local_vbuckets,
        }
    }

    /// Whether the declared vbucket count is at most [`MAX_NUM_VBUCKETS`].
    pub fn has_valid_vbucket_count(&self) -> bool {
        self.num_vbuckets <= MAX_NUM_VBUCKETS
    }
}
