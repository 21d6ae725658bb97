//! Picker snapshots for shard-aware connection selection.
//!
//! A [`PickerSnapshot`] is derived from a [`RoutingTable`] and the readiness
//! of each endpoint's connection. It is built once per topology or readiness
//! change and then only read. The only mutable part is the round-robin
//! cursor of the fallback list, an atomic counter.
//!
//! # Lookup
//!
//! For each bucket the snapshot holds an array with one slot per vbucket.
//! A slot points at the ready connection that owns the vbucket locally, or is
//! empty. Picking a call with a routing hint is a hash plus two indexed reads.
//! Calls without a hint, for unknown buckets, or landing on an empty slot go
//! to the next ready connection in round-robin order.

use crate::error::{PickError, PickResult};
use crate::topology::RoutingTable;
use crate::types::{Address, RoutingHint};
use crate::vbucket::vbucket_for_key;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Immutable bucket/vbucket → connection lookup with round-robin fallback.
#[derive(Debug)]
pub struct PickerSnapshot<C> {
    /// Ready connections, the fallback list.
    ready: Vec<C>,
    /// Addresses of `ready`, index aligned.
    ready_addresses: Vec<Address>,
    /// Bucket name to per-vbucket index into `ready`.
    buckets: HashMap<String, Vec<Option<usize>>>,
    /// Round-robin cursor for the fallback list.
    next: AtomicUsize,
}

impl<C> PickerSnapshot<C> {
    /// Create a snapshot with no connections.
    ///
    /// Every pick fails with [`PickError::NoAvailableBackend`].
    pub fn empty() -> Self {
        Self {
            ready: Vec::new(),
            ready_addresses: Vec::new(),
            buckets: HashMap::new(),
            next: AtomicUsize::new(0),
        }
    }

    /// Build a snapshot from a routing table.
    ///
    /// Only endpoints whose connection passes `is_ready` take part, both in
    /// the vbucket lookup and in the fallback list. The vbucket array of a
    /// bucket is sized by the first ready endpoint that reports it; vbucket
    /// ids outside that size are ignored, as are declarations above
    /// [`MAX_NUM_VBUCKETS`](crate::vbucket::MAX_NUM_VBUCKETS).
    pub fn build<F>(table: &RoutingTable<C>, is_ready: F) -> Self
    where
        C: Clone,
        F: Fn(&C) -> bool,
    {
        let mut ready = Vec::new();
        let mut ready_addresses = Vec::new();
        let mut buckets: HashMap<String, Vec<Option<usize>>> = HashMap::new();

        for endpoint in table.endpoints() {
            if !is_ready(&endpoint.connection) {
                continue;
            }

            let index = ready.len();
            ready.push(endpoint.connection.clone());
            ready_addresses.push(endpoint.address.clone());

            for (bucket_name, routing) in &endpoint.attributes.buckets {
                if !routing.has_valid_vbucket_count() {
                    continue;
                }
                let slots = buckets
                    .entry(bucket_name.clone())
                    .or_insert_with(|| vec![None; routing.num_vbuckets as usize]);

                for &vb in &routing.local_vbuckets {
                    if let Some(slot) = slots.get_mut(vb as usize) {
                        *slot = Some(index);
                    }
                }
            }
        }

        Self {
            ready,
            ready_addresses,
            buckets,
            next: AtomicUsize::new(0),
        }
    }

    /// Pick a connection for a call.
    ///
    /// # Errors
    ///
    /// Returns [`PickError::NoAvailableBackend`] if there are no ready
    /// connections.
    pub fn pick(&self, hint: Option<&RoutingHint>) -> PickResult<&C> {
        if let Some(conn) = hint.and_then(|h| self.owner_for_key(&h.bucket_name, &h.key)) {
            return Ok(conn);
        }
        self.round_robin()
    }

    /// Pick a connection for a key in a bucket.
    ///
    /// # Errors
    ///
    /// Returns [`PickError::NoAvailableBackend`] if there are no ready
    /// connections.
    pub fn pick_for_key(&self, bucket_name: &str, key: &[u8]) -> PickResult<&C> {
        if let Some(conn) = self.owner_for_key(bucket_name, key) {
            return Ok(conn);
        }
        self.round_robin()
    }

    /// Next connection from the fallback list.
    ///
    /// # Errors
    ///
    /// Returns [`PickError::NoAvailableBackend`] if the list is empty.
    pub fn round_robin(&self) -> PickResult<&C> {
        if self.ready.is_empty() {
            return Err(PickError::NoAvailableBackend);
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.ready.len();
        Ok(&self.ready[idx])
    }

    /// The owning connection of a key, if recorded.
    pub fn owner_for_key(&self, bucket_name: &str, key: &[u8]) -> Option<&C> {
        let slots = self.buckets.get(bucket_name)?;
        let vb = vbucket_for_key(key, slots.len() as u32)?;
        self.owner_slot(slots, vb)
    }

    /// The owning connection of a vbucket, if recorded.
    pub fn owner_of(&self, bucket_name: &str, vbucket: u32) -> Option<&C> {
        let slots = self.buckets.get(bucket_name)?;
        self.owner_slot(slots, vbucket)
    }

    /// Address of the owner of a vbucket, if recorded.
    pub fn owner_address_of(&self, bucket_name: &str, vbucket: u32) -> Option<&Address> {
        let slots = self.buckets.get(bucket_name)?;
        let index = (*slots.get(vbucket as usize)?)?;
        self.ready_addresses.get(index)
    }

    /// Number of vbuckets tracked for a bucket.
    pub fn num_vbuckets(&self, bucket_name: &str) -> Option<u32> {
        self.buckets.get(bucket_name).map(|slots| slots.len() as u32)
    }

    /// Buckets with a vbucket lookup.
    pub fn bucket_names(&self) -> Vec<&str> {
        self.buckets.keys().map(String::as_str).collect()
    }

    /// Ready connections in fallback order.
    pub fn ready(&self) -> &[C] {
        &self.ready
    }

    /// Addresses of the ready connections in fallback order.
    pub fn ready_addresses(&self) -> &[Address] {
        &self.ready_addresses
    }

    /// Number of ready connections.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    fn owner_slot<'a>(&'a self, slots: &[Option<usize>], vbucket: u32) -> Option<&'a C> {
        let index = (*slots.get(vbucket as usize)?)?;
        self.ready.get(index)
    }
}

impl<C> Default for PickerSnapshot<C> {
    fn default() -> Self {
        Self::empty()
    }
}
