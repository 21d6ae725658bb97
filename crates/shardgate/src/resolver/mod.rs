//! Topology resolver.
//!
//! The resolver discovers gateway nodes by name resolution, keeps one pooled
//! connection per node and one routing subscription per `(bucket, node)`
//! pair, and publishes a [`RoutingTable`] to its [`StateListener`] whenever
//! addresses or vbucket ownership change.
//!
//! # Passes
//!
//! A pass runs on a fixed interval or on [`TopologyResolver::resolve_now`]:
//!
//! 1. Resolve the target into addresses, dropping duplicates
//! 2. Reuse the pooled connection per address, or dial one
//! 3. List buckets on the first connection
//! 4. Subscribe every `(bucket, address)` pair without a subscription; the
//!    first message is applied before the pass continues
//! 5. Drop ownership for buckets no longer listed
//! 6. Remove and close connections to addresses no longer resolved
//! 7. Publish if anything changed
//!
//! Any failure in steps 1-4 aborts the pass without publishing and without
//! touching established connections or ownership. The next pass retries.
//!
//! Messages arriving on subscriptions between passes go through a single
//! aggregator task, which applies them and publishes immediately.

mod dns;
mod watch;

pub use dns::{NameResolver, SystemResolver, Target};

use self::watch::RoutingUpdate;

use crate::auth::Authenticator;
use crate::error::{RoutingError, RoutingResult};
use crate::pool::ConnectionPool;
use crate::rpc::{ClientConfig, Connection, Dialer};
use parking_lot::Mutex;
use shardgate_core::{
    Address, BucketRouting, Endpoint, OwnershipKey, OwnershipMap, RoutingTable,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch as watch_channel};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

/// Receives the resolver's publications.
pub trait StateListener: Send + Sync {
    /// A new routing table replaces the previous one.
    fn update_state(&self, table: RoutingTable<Connection>);

    /// Connection readiness may have changed since the last publication.
    fn refresh(&self) {}
}

/// Lifecycle phase of a [`TopologyResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPhase {
    /// Waiting for the next pass.
    Idle,
    /// A pass is running.
    Resolving,
    /// The running pass is handing a new table to the listener.
    Published,
    /// Closed; terminal.
    Closed,
}

/// Settings for a [`TopologyResolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// What to resolve.
    pub target: Target,
    /// Settings for connections the resolver dials.
    pub client_config: ClientConfig,
    /// Credentials handed to every dialed connection.
    pub authenticator: Option<Authenticator>,
    /// Interval between background passes.
    pub resolve_interval: Duration,
}

#[derive(Debug)]
struct Subscription {
    id: u64,
    task: Option<AbortHandle>,
}

impl Subscription {
    fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[derive(Debug, Default)]
struct ResolverState {
    /// Addresses of the last successful pass.
    addresses: Vec<Address>,
    ownership: OwnershipMap,
    subscriptions: HashMap<OwnershipKey, Subscription>,
}

impl ResolverState {
    /// Forget ownership and subscriptions matching `predicate`.
    ///
    /// Returns whether any ownership was dropped.
    fn forget<F>(&mut self, predicate: F) -> bool
    where
        F: Fn(&OwnershipKey) -> bool,
    {
        self.subscriptions.retain(|key, sub| {
            if predicate(key) {
                sub.cancel();
                false
            } else {
                true
            }
        });
        !self.ownership.remove_where(|key| predicate(key)).is_empty()
    }
}

pub(crate) struct ResolverShared {
    config: ResolverConfig,
    name_resolver: Arc<dyn NameResolver>,
    dialer: Arc<dyn Dialer>,
    pool: Arc<ConnectionPool>,
    listener: Arc<dyn StateListener>,
    state: Mutex<ResolverState>,
    phase: Mutex<ResolverPhase>,
    dirty: AtomicBool,
    publish_lock: Mutex<()>,
    pass_lock: tokio::sync::Mutex<()>,
    next_subscription: AtomicU64,
    updates: mpsc::UnboundedSender<RoutingUpdate>,
    shutdown: watch_channel::Receiver<bool>,
}

impl ResolverShared {
    fn is_closed(&self) -> bool {
        *self.phase.lock() == ResolverPhase::Closed
    }

    fn set_phase(&self, next: ResolverPhase) {
        let mut phase = self.phase.lock();
        if *phase != ResolverPhase::Closed {
            *phase = next;
        }
    }

    /// Run one pass, serialized with every other pass.
    #[instrument(skip(self), fields(target = %self.config.target))]
    pub(crate) async fn run_pass(self: &Arc<Self>) -> RoutingResult<()> {
        let _pass = self.pass_lock.lock().await;
        if self.is_closed() {
            return Err(RoutingError::Closed);
        }

        self.set_phase(ResolverPhase::Resolving);
        let result = self.resolve_pass().await;
        if let Err(e) = &result {
            error!("Resolution pass failed: {}", e);
        }

        self.listener.refresh();
        self.set_phase(ResolverPhase::Idle);
        result
    }

    async fn resolve_pass(self: &Arc<Self>) -> RoutingResult<()> {
        let target = &self.config.target;
        let addresses = dns::dedupe(self.name_resolver.resolve(target).await?);
        if addresses.is_empty() {
            return Err(RoutingError::NoAddresses(target.to_string()));
        }

        let mut connections = Vec::with_capacity(addresses.len());
        for address in &addresses {
            connections.push(self.connection_for(address).await?);
        }

        let listed = connections[0]
            .list_buckets()
            .await
            .map_err(|e| RoutingError::ListBuckets(Box::new(e)))?;
        let buckets: HashSet<String> = listed.buckets.into_iter().map(|b| b.bucket_name).collect();

        for bucket_name in &buckets {
            for conn in &connections {
                self.ensure_subscribed(bucket_name, conn).await?;
            }
        }

        let resolved: HashSet<&Address> = addresses.iter().collect();
        let removed: Vec<Address> = self
            .pool
            .addresses()
            .into_iter()
            .filter(|a| !resolved.contains(a))
            .collect();

        {
            let mut state = self.state.lock();
            if state.forget(|key| !buckets.contains(&key.bucket_name)) {
                self.dirty.store(true, Ordering::Release);
            }
            state.forget(|key| removed.contains(&key.address));
            if state.addresses != addresses {
                self.dirty.store(true, Ordering::Release);
            }
            state.addresses = addresses.clone();
        }

        for address in &removed {
            for conn in self.pool.remove(address) {
                if let Err(e) = conn.close() {
                    debug!("Closing connection to {}: {}", address, e);
                }
            }
            info!("Address {} is no longer resolved, dropped", address);
            self.dirty.store(true, Ordering::Release);
        }

        if self.dirty.swap(false, Ordering::AcqRel) {
            self.set_phase(ResolverPhase::Published);
            self.publish();
        }
        Ok(())
    }

    /// The pooled connection for `address`, dialing a new one if there is
    /// none or the pooled one has failed.
    async fn connection_for(&self, address: &Address) -> RoutingResult<Connection> {
        if let Some(conn) = self.pool.get(address) {
            if conn.is_ready() {
                return Ok(conn);
            }
            warn!("Connection to {} has failed, redialing", address);
            for stale in self.pool.remove(address) {
                let _ = stale.close();
            }
            self.state.lock().forget(|key| &key.address == address);
        }

        let conn = self
            .dialer
            .dial(
                address,
                &self.config.client_config,
                self.config.authenticator.clone(),
            )
            .await?;
        self.pool.insert(conn.clone());
        tokio::spawn(watch::readiness_task(
            conn.clone(),
            Arc::clone(&self.listener),
            self.shutdown.clone(),
        ));
        self.dirty.store(true, Ordering::Release);
        Ok(conn)
    }

    async fn ensure_subscribed(self: &Arc<Self>, bucket_name: &str, conn: &Connection) -> RoutingResult<()> {
        let key = OwnershipKey::new(bucket_name, conn.address().clone());
        let subscribed = self.state.lock().subscriptions.contains_key(&key);
        if subscribed {
            return Ok(());
        }

        let (first, routing) = conn
            .watch_routing(bucket_name)
            .await
            .map_err(|e| RoutingError::WatchSetup {
                bucket_name: bucket_name.to_string(),
                address: conn.address().clone(),
                source: Box::new(e),
            })?;

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock();
            let changed = match checked_routing(&key, first.bucket_routing()) {
                Some(bucket_routing) => state.ownership.apply(key.clone(), bucket_routing),
                None => state.ownership.remove(&key).is_some(),
            };
            if changed {
                self.dirty.store(true, Ordering::Release);
            }
            state.subscriptions.insert(key.clone(), Subscription { id, task: None });
        }
        debug!("Subscribed to routing of {} (subscription {})", key, id);

        let handle = tokio::spawn(watch::subscription_task(
            key.clone(),
            id,
            routing,
            self.updates.clone(),
            self.shutdown.clone(),
        ));

        let mut state = self.state.lock();
        match state.subscriptions.get_mut(&key) {
            Some(sub) if sub.id == id => sub.task = Some(handle.abort_handle()),
            _ => handle.abort(),
        }
        Ok(())
    }

    /// Apply one subscription message and publish if ownership changed.
    pub(crate) fn apply_update(&self, update: RoutingUpdate) {
        let RoutingUpdate {
            key,
            subscription_id,
            result,
        } = update;

        let changed = {
            let mut state = self.state.lock();
            match state.subscriptions.get(&key) {
                Some(sub) if sub.id == subscription_id => {}
                _ => {
                    debug!("Ignoring stale update for {} (subscription {})", key, subscription_id);
                    return;
                }
            }

            match result.map(|routing| checked_routing(&key, routing)) {
                Ok(Some(routing)) => state.ownership.apply(key, routing),
                Ok(None) => state.ownership.remove(&key).is_some(),
                Err(e) => {
                    warn!("Routing subscription for {} closed: {}", key, e);
                    state.subscriptions.remove(&key);
                    state.ownership.remove(&key).is_some()
                }
            }
        };

        if changed {
            self.publish();
        }
    }

    /// Build a table from the last resolved addresses and current ownership
    /// and hand it to the listener.
    fn publish(&self) {
        let _publishing = self.publish_lock.lock();
        let table = {
            let state = self.state.lock();
            let endpoints = state
                .addresses
                .iter()
                .filter_map(|address| {
                    self.pool.get(address).map(|conn| {
                        Endpoint::new(address.clone(), conn, state.ownership.attributes_for(address))
                    })
                })
                .collect();
            RoutingTable::new(endpoints)
        };

        debug!(
            endpoints = table.len(),
            "Publishing routing table"
        );
        self.listener.update_state(table);
    }

    fn close(&self) {
        let mut state = self.state.lock();
        for sub in state.subscriptions.values() {
            sub.cancel();
        }
        state.subscriptions.clear();
    }
}

/// Routing with an unusable vbucket count is treated as no routing.
fn checked_routing(key: &OwnershipKey, routing: Option<BucketRouting>) -> Option<BucketRouting> {
    routing.filter(|routing| {
        let valid = routing.has_valid_vbucket_count();
        if !valid {
            warn!(
                num_vbuckets = routing.num_vbuckets,
                "Ignoring routing for {} with an out-of-range vbucket count", key
            );
        }
        valid
    })
}

/// Keeps a [`StateListener`] informed of node addresses and vbucket
/// ownership.
pub struct TopologyResolver {
    shared: Arc<ResolverShared>,
    resolve_now: mpsc::Sender<()>,
    shutdown: watch_channel::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TopologyResolver {
    /// Start the background resolve loop and aggregator.
    ///
    /// The first background pass runs after `resolve_interval`; call
    /// [`resolve`](Self::resolve) to run one right away.
    pub fn start(
        config: ResolverConfig,
        name_resolver: Arc<dyn NameResolver>,
        dialer: Arc<dyn Dialer>,
        pool: Arc<ConnectionPool>,
        listener: Arc<dyn StateListener>,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (resolve_now_tx, resolve_now_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch_channel::channel(false);
        let interval = config.resolve_interval;

        let shared = Arc::new(ResolverShared {
            config,
            name_resolver,
            dialer,
            pool,
            listener,
            state: Mutex::new(ResolverState::default()),
            phase: Mutex::new(ResolverPhase::Idle),
            dirty: AtomicBool::new(false),
            publish_lock: Mutex::new(()),
            pass_lock: tokio::sync::Mutex::new(()),
            next_subscription: AtomicU64::new(1),
            updates: updates_tx,
            shutdown: shutdown_rx.clone(),
        });

        let aggregator = tokio::spawn(watch::aggregator_task(
            Arc::clone(&shared),
            updates_rx,
            shutdown_rx.clone(),
        ));
        let resolve_loop = tokio::spawn(watch::resolve_loop(
            Arc::clone(&shared),
            interval,
            resolve_now_rx,
            shutdown_rx,
        ));

        info!("Started topology resolver for {}", shared.config.target);

        Self {
            shared,
            resolve_now: resolve_now_tx,
            shutdown: shutdown_tx,
            tasks: Mutex::new(vec![aggregator, resolve_loop]),
        }
    }

    /// Run one pass now and wait for it.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the pass, or [`RoutingError::Closed`].
    pub async fn resolve(&self) -> RoutingResult<()> {
        self.shared.run_pass().await
    }

    /// Ask the background loop for a pass without waiting.
    ///
    /// Requests coalesce while one is pending and are dropped after close.
    pub fn resolve_now(&self) {
        if self.shared.is_closed() {
            return;
        }
        let _ = self.resolve_now.try_send(());
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ResolverPhase {
        *self.shared.phase.lock()
    }

    /// Stop all background work. Further calls are no-ops.
    pub fn close(&self) {
        {
            let mut phase = self.shared.phase.lock();
            if *phase == ResolverPhase::Closed {
                return;
            }
            *phase = ResolverPhase::Closed;
        }

        let _ = self.shutdown.send(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.close();
        info!("Closed topology resolver for {}", self.shared.config.target);
    }
}

impl Drop for TopologyResolver {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TopologyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyResolver")
            .field("target", &self.shared.config.target)
            .field("phase", &self.phase())
            .finish()
    }
}
