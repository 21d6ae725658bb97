//! Routing-aware balancer.
//!
//! The balancer is the resolver's [`StateListener`]. It keeps the latest
//! [`RoutingTable`] and derives a [`PickerSnapshot`] from it and the
//! readiness of each connection. Picking reads one snapshot reference and
//! never waits on a rebuild.

use crate::error::RoutingResult;
use crate::resolver::StateListener;
use crate::rpc::Connection;
use parking_lot::{Mutex, RwLock};
use shardgate_core::{PickerSnapshot, RoutingHint, RoutingTable};
use std::sync::Arc;
use tracing::debug;

/// Picks connections by vbucket ownership.
pub struct RoutingBalancer {
    table: RwLock<Arc<RoutingTable<Connection>>>,
    snapshot: RwLock<Arc<PickerSnapshot<Connection>>>,
    /// Endpoint readiness the current snapshot was built from.
    readiness: Mutex<Vec<bool>>,
    build_lock: Mutex<()>,
}

impl RoutingBalancer {
    /// Create a balancer with no endpoints.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(RoutingTable::empty())),
            snapshot: RwLock::new(Arc::new(PickerSnapshot::empty())),
            readiness: Mutex::new(Vec::new()),
            build_lock: Mutex::new(()),
        }
    }

    /// Pick the connection for a call.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoAvailableBackend`](crate::RoutingError::NoAvailableBackend)
    /// if no connection is ready.
    pub fn pick(&self, hint: Option<&RoutingHint>) -> RoutingResult<Connection> {
        let snapshot = self.snapshot();
        Ok(snapshot.pick(hint)?.clone())
    }

    /// The current picker snapshot.
    pub fn snapshot(&self) -> Arc<PickerSnapshot<Connection>> {
        Arc::clone(&self.snapshot.read())
    }

    /// The last published routing table.
    pub fn table(&self) -> Arc<RoutingTable<Connection>> {
        Arc::clone(&self.table.read())
    }

    fn rebuild(&self, only_if_readiness_changed: bool) {
        let _building = self.build_lock.lock();
        let table = self.table();
        let readiness: Vec<bool> = table
            .endpoints()
            .iter()
            .map(|e| e.connection.is_ready())
            .collect();

        let mut current = self.readiness.lock();
        if only_if_readiness_changed && *current == readiness {
            return;
        }

        let snapshot = PickerSnapshot::build(&*table, Connection::is_ready);
        debug!(
            ready = snapshot.ready_count(),
            buckets = snapshot.bucket_names().len(),
            "Rebuilt picker snapshot"
        );
        *self.snapshot.write() = Arc::new(snapshot);
        *current = readiness;
    }
}

impl Default for RoutingBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateListener for RoutingBalancer {
    fn update_state(&self, table: RoutingTable<Connection>) {
        *self.table.write() = Arc::new(table);
        self.rebuild(false);
    }

    fn refresh(&self) {
        self.rebuild(true);
    }
}

impl std::fmt::Debug for RoutingBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingBalancer")
            .field("endpoints", &self.table().len())
            .field("ready", &self.snapshot().ready_count())
            .finish()
    }
}
