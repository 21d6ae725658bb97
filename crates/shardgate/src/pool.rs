//! Connection pool shared by the resolver and the routing client.
//!
//! The pool owns every connection the client has dialed, keyed by address.
//! Members are stored copy-on-write: maintenance swaps in a new list, and
//! [`ConnectionPool::acquire`] only ever reads a stable one.

use crate::error::{RoutingError, RoutingResult};
use crate::rpc::Connection;
use parking_lot::RwLock;
use shardgate_core::Address;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Set of live connections with round-robin selection.
///
/// There are no health checks; an unhealthy connection stays selectable
/// until the resolver replaces it.
pub struct ConnectionPool {
    members: RwLock<Arc<Vec<Connection>>>,
    next: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create a pool from an initial member list.
    pub fn new(connections: Vec<Connection>) -> Self {
        Self {
            members: RwLock::new(Arc::new(connections)),
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> Arc<Vec<Connection>> {
        Arc::clone(&self.members.read())
    }

    /// Next member in round-robin order, or `None` if the pool is empty.
    pub fn acquire(&self) -> Option<Connection> {
        let members = self.snapshot();
        if members.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % members.len();
        Some(members[idx].clone())
    }

    /// The first connection to `address`, if any.
    pub fn get(&self, address: &Address) -> Option<Connection> {
        self.snapshot()
            .iter()
            .find(|c| c.address() == address)
            .cloned()
    }

    /// Add a connection.
    ///
    /// A connection inserted after [`close`](Self::close) is closed instead.
    pub fn insert(&self, connection: Connection) {
        if self.is_closed() {
            let _ = connection.close();
            return;
        }
        let mut members = self.members.write();
        let mut next = Vec::with_capacity(members.len() + 1);
        next.extend(members.iter().cloned());
        debug!("Added connection to {} to pool", connection.address());
        next.push(connection);
        *members = Arc::new(next);
    }

    /// Remove every connection to `address` and return them.
    ///
    /// The removed connections are not closed.
    pub fn remove(&self, address: &Address) -> Vec<Connection> {
        let mut members = self.members.write();
        let (removed, kept): (Vec<_>, Vec<_>) = members
            .iter()
            .cloned()
            .partition(|c| c.address() == address);
        if !removed.is_empty() {
            debug!("Removed {} connection(s) to {} from pool", removed.len(), address);
            *members = Arc::new(kept);
        }
        removed
    }

    /// Addresses of all members, in pool order.
    pub fn addresses(&self) -> Vec<Address> {
        self.snapshot().iter().map(|c| c.address().clone()).collect()
    }

    /// All members.
    pub fn connections(&self) -> Vec<Connection> {
        self.snapshot().to_vec()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the pool has no members.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Number of members that are ready.
    pub fn ready_count(&self) -> usize {
        self.snapshot().iter().filter(|c| c.is_ready()).count()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every member.
    ///
    /// All members are closed even if some fail. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the last close error seen.
    pub fn close(&self) -> RoutingResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let members = std::mem::take(&mut *self.members.write());
        let mut last_error: Option<RoutingError> = None;
        for conn in members.iter() {
            if let Err(e) = conn.close() {
                warn!("Failed to close connection to {}: {}", conn.address(), e);
                last_error = Some(e);
            }
        }
        debug!("Closed connection pool ({} connections)", members.len());

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("members", &self.addresses())
            .field("closed", &self.is_closed())
            .finish()
    }
}
