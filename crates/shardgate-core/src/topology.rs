//! Shard ownership and routing tables.
//!
//! The resolver records, for every `(bucket, address)` pair it watches, the
//! latest vbucket ownership that address reported. When the topology changes
//! it folds that map into a [`RoutingTable`]: one [`Endpoint`] per address,
//! carrying the connection and the address's per-bucket ownership.
//!
//! Both types are plain values. Publication happens by building a fresh
//! table and swapping it in whole, never by editing a published one.

use crate::types::{Address, BucketRouting};
use std::collections::{BTreeMap, HashMap};

/// Key of one ownership entry: a bucket as seen from one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnershipKey {
    /// Bucket name.
    pub bucket_name: String,
    /// Node reporting the ownership.
    pub address: Address,
}

impl OwnershipKey {
    /// Create a key for a bucket on a node.
    pub fn new(bucket_name: impl Into<String>, address: Address) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            address,
        }
    }
}

impl std::fmt::Display for OwnershipKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bucket_name, self.address)
    }
}

/// Latest ownership reported by each watched `(bucket, address)` pair.
///
/// Each entry is authoritative on its own: applying an update replaces the
/// previous value for that key entirely.
#[derive(Debug, Clone, Default)]
pub struct OwnershipMap {
    entries: HashMap<OwnershipKey, BucketRouting>,
}

impl OwnershipMap {
    /// Create an empty ownership map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the ownership for a key.
    ///
    /// Returns true if the stored value changed.
    pub fn apply(&mut self, key: OwnershipKey, routing: BucketRouting) -> bool {
        match self.entries.insert(key, routing.clone()) {
            Some(previous) => previous != routing,
            None => true,
        }
    }

    /// Remove the ownership for a key.
    ///
    /// Returns the removed routing, if any.
    pub fn remove(&mut self, key: &OwnershipKey) -> Option<BucketRouting> {
        self.entries.remove(key)
    }

    /// Remove every entry matching the predicate.
    ///
    /// Returns the removed keys.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<OwnershipKey>
    where
        F: FnMut(&OwnershipKey) -> bool,
    {
        let removed: Vec<OwnershipKey> = self
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &removed {
            self.entries.remove(key);
        }
        removed
    }

    /// Get the ownership for a key.
    pub fn get(&self, key: &OwnershipKey) -> Option<&BucketRouting> {
        self.entries.get(key)
    }

    /// Check whether a key has an entry.
    pub fn contains(&self, key: &OwnershipKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect every bucket's ownership for one address.
    pub fn attributes_for(&self, address: &Address) -> EndpointAttributes {
        let buckets = self
            .entries
            .iter()
            .filter(|(key, _)| &key.address == address)
            .map(|(key, routing)| (key.bucket_name.clone(), routing.clone()))
            .collect();
        EndpointAttributes { buckets }
    }
}

/// Per-bucket ownership attached to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointAttributes {
    /// Bucket name to the vbuckets local to the endpoint.
    pub buckets: BTreeMap<String, BucketRouting>,
}

impl EndpointAttributes {
    /// Whether the endpoint carries no ownership at all.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// One resolved node with its connection and ownership.
#[derive(Debug, Clone)]
pub struct Endpoint<C> {
    /// The node's address.
    pub address: Address,
    /// The connection serving the node.
    pub connection: C,
    /// Vbucket ownership reported by the node.
    pub attributes: EndpointAttributes,
}

impl<C> Endpoint<C> {
    /// Create an endpoint.
    pub fn new(address: Address, connection: C, attributes: EndpointAttributes) -> Self {
        Self {
            address,
            connection,
            attributes,
        }
    }
}

/// Immutable set of endpoints published by the resolver.
#[derive(Debug, Clone)]
pub struct RoutingTable<C> {
    endpoints: Vec<Endpoint<C>>,
}

impl<C> RoutingTable<C> {
    /// Create a routing table from endpoints.
    pub fn new(endpoints: Vec<Endpoint<C>>) -> Self {
        Self { endpoints }
    }

    /// Create a table with no endpoints.
    pub fn empty() -> Self {
        Self {
            endpoints: Vec::new(),
        }
    }

    /// The table's endpoints, in resolution order.
    pub fn endpoints(&self) -> &[Endpoint<C>] {
        &self.endpoints
    }

    /// The table's addresses, in resolution order.
    pub fn addresses(&self) -> Vec<Address> {
        self.endpoints.iter().map(|e| e.address.clone()).collect()
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the table has no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl<C> Default for RoutingTable<C> {
    fn default() -> Self {
        Self::empty()
    }
}
