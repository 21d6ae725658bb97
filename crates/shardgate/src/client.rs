//! The routing client.
//!
//! [`RoutingClient`] is the entry point: it dials the target, owns the
//! connection pool and, with optimized routing, the topology resolver and
//! balancer. Every RPC goes through [`RoutingClient::fetch_connection`] and
//! its bucket/key variants; the per-service accessors in
//! [`services`](crate::services) are thin forwarders over them.

use crate::auth::Authenticator;
use crate::balancer::RoutingBalancer;
use crate::config::DialOptions;
use crate::error::{RoutingError, RoutingResult};
use crate::pool::ConnectionPool;
use crate::resolver::{
    NameResolver, ResolverConfig, ResolverPhase, StateListener, SystemResolver, Target,
    TopologyResolver,
};
use crate::rpc::{Connection, Dialer, TcpDialer};
use crate::services::{
    AnalyticsV1, BucketAdminV1, CollectionAdminV1, KvV1, QueryAdminV1, QueryV1, RoutingV2,
    SearchAdminV1, SearchV1, ViewV1,
};
use parking_lot::{Mutex, RwLock};
use shardgate_core::{PickerSnapshot, RoutingHint};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observable state of a client's connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The client has been closed.
    Closed,
    /// The client is open.
    Open {
        /// Connections currently able to serve calls.
        ready: usize,
        /// All pooled connections.
        total: usize,
    },
}

enum Router {
    /// Round-robin over connections dialed straight to the target.
    Direct,
    /// Vbucket-aware routing over every resolved node.
    Optimized {
        resolver: TopologyResolver,
        balancer: Arc<RoutingBalancer>,
    },
}

struct RoutingState {
    pool: Arc<ConnectionPool>,
    router: Router,
}

impl RoutingState {
    fn pick(&self, hint: Option<&RoutingHint>) -> RoutingResult<Connection> {
        match &self.router {
            Router::Direct => self.pool.acquire().ok_or(RoutingError::NoAvailableBackend),
            Router::Optimized { balancer, .. } => balancer.pick(hint),
        }
    }
}

/// Client that routes each call to the node owning its data.
///
/// # Example
///
/// ```rust,ignore
/// use shardgate::{Authenticator, DialOptions, RoutingClient, RoutingConfig};
///
/// let options = DialOptions::new(RoutingConfig::default().with_optimized_routing(true))
///     .with_authenticator(Authenticator::basic("user", "pass"));
/// let client = RoutingClient::dial("cluster.local", options).await?;
///
/// let doc = client.kv_v1().get(GetRequest { id: DocumentId::new("orders", "o-1") }).await?;
/// client.close()?;
/// ```
pub struct RoutingClient {
    target: Target,
    routing: RwLock<Option<Arc<RoutingState>>>,
    authenticator: Option<Authenticator>,
    reconfigure_lock: Mutex<()>,
}

impl RoutingClient {
    /// Dial `target` over TCP using system name resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is invalid or, without optimized
    /// routing, if a connection cannot be established.
    pub async fn dial(target: &str, options: DialOptions) -> RoutingResult<Self> {
        Self::dial_with(target, options, Arc::new(TcpDialer), Arc::new(SystemResolver)).await
    }

    /// Dial `target` with the given dialer and name resolver.
    ///
    /// With optimized routing the first resolution pass runs before this
    /// returns. If it fails, the failure is logged and the background loop
    /// keeps retrying; calls fail with no available backend until a pass
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is invalid or, without optimized
    /// routing, if a connection cannot be established.
    pub async fn dial_with(
        target: &str,
        options: DialOptions,
        dialer: Arc<dyn Dialer>,
        name_resolver: Arc<dyn NameResolver>,
    ) -> RoutingResult<Self> {
        let DialOptions {
            config,
            authenticator,
        } = options;
        let target = Target::parse(target, config.default_port)?;
        let client_config = config.client_config();
        let pool = Arc::new(ConnectionPool::default());

        let router = if config.optimized_routing {
            let balancer = Arc::new(RoutingBalancer::new());
            let listener: Arc<dyn StateListener> = balancer.clone();
            let resolver = TopologyResolver::start(
                ResolverConfig {
                    target: target.clone(),
                    client_config,
                    authenticator: authenticator.clone(),
                    resolve_interval: config.resolve_interval(),
                },
                name_resolver,
                dialer,
                Arc::clone(&pool),
                listener,
            );

            if let Err(e) = resolver.resolve().await {
                warn!(
                    "Initial topology resolution for {} failed, retrying in background: {}",
                    target, e
                );
            }
            Router::Optimized { resolver, balancer }
        } else {
            let address = target.address();
            for _ in 0..config.pool_size.max(1) {
                match dialer
                    .dial(&address, &client_config, authenticator.clone())
                    .await
                {
                    Ok(conn) => pool.insert(conn),
                    Err(e) => {
                        let _ = pool.close();
                        return Err(e);
                    }
                }
            }
            Router::Direct
        };

        info!(
            optimized = config.optimized_routing,
            connections = pool.len(),
            "Routing client dialed {}",
            target
        );

        Ok(Self {
            target,
            routing: RwLock::new(Some(Arc::new(RoutingState { pool, router }))),
            authenticator,
            reconfigure_lock: Mutex::new(()),
        })
    }

    fn state(&self) -> RoutingResult<Arc<RoutingState>> {
        self.routing.read().clone().ok_or(RoutingError::Closed)
    }

    /// The parsed dial target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The connection that should serve a call with `hint`.
    ///
    /// Without a hint, or when the hint's owner is unknown, any ready
    /// connection is returned in round-robin order.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Closed`] after [`close`](Self::close) and
    /// [`RoutingError::NoAvailableBackend`] if no connection is ready.
    pub fn fetch_connection(&self, hint: Option<&RoutingHint>) -> RoutingResult<Connection> {
        self.state()?.pick(hint)
    }

    /// A connection for a bucket-scoped call that has no key.
    ///
    /// # Errors
    ///
    /// As [`fetch_connection`](Self::fetch_connection).
    pub fn fetch_connection_for_bucket(&self, _bucket_name: &str) -> RoutingResult<Connection> {
        self.fetch_connection(None)
    }

    /// The connection owning `key` in `bucket_name`.
    ///
    /// # Errors
    ///
    /// As [`fetch_connection`](Self::fetch_connection).
    pub fn fetch_connection_for_key(
        &self,
        bucket_name: &str,
        key: impl AsRef<[u8]>,
    ) -> RoutingResult<Connection> {
        let hint = RoutingHint::new(bucket_name, key);
        self.fetch_connection(Some(&hint))
    }

    /// Ask for a topology resolution pass without waiting for it.
    ///
    /// A no-op without optimized routing or after close.
    pub fn resolve_now(&self) {
        if let Ok(state) = self.state() {
            if let Router::Optimized { resolver, .. } = &state.router {
                resolver.resolve_now();
            }
        }
    }

    /// Run a topology resolution pass and wait for it.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Closed`] after close, or the error that
    /// aborted the pass. Without optimized routing this is a no-op.
    pub async fn resolve(&self) -> RoutingResult<()> {
        let state = self.state()?;
        match &state.router {
            Router::Direct => Ok(()),
            Router::Optimized { resolver, .. } => resolver.resolve().await,
        }
    }

    /// Phase of the topology resolver, if optimized routing is enabled.
    pub fn resolver_phase(&self) -> Option<ResolverPhase> {
        match &self.state().ok()?.router {
            Router::Direct => None,
            Router::Optimized { resolver, .. } => Some(resolver.phase()),
        }
    }

    /// The picker snapshot currently used for routing, if optimized routing
    /// is enabled and the client is open.
    pub fn picker_snapshot(&self) -> Option<Arc<PickerSnapshot<Connection>>> {
        match &self.state().ok()?.router {
            Router::Direct => None,
            Router::Optimized { balancer, .. } => Some(balancer.snapshot()),
        }
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        match self.state() {
            Ok(state) => ConnectionState::Open {
                ready: state.pool.ready_count(),
                total: state.pool.len(),
            },
            Err(_) => ConnectionState::Closed,
        }
    }

    /// Replace the configured credentials with those of `authenticator`.
    ///
    /// Existing connections observe the new credentials on their next call.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::AuthenticatorUnsupported`] if the client was
    /// dialed without credentials, and
    /// [`RoutingError::AuthenticatorMismatch`] if the kinds differ. The
    /// current credentials are unchanged on error.
    pub fn reconfigure_authenticator(&self, authenticator: &Authenticator) -> RoutingResult<()> {
        let _reconfiguring = self.reconfigure_lock.lock();
        let current = self
            .authenticator
            .as_ref()
            .ok_or(RoutingError::AuthenticatorUnsupported)?;
        current.replace_from(authenticator)?;
        info!("Reconfigured {} authenticator", current.kind());
        Ok(())
    }

    /// Close the client. Further calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the last error seen while closing pooled connections.
    pub fn close(&self) -> RoutingResult<()> {
        let state = {
            let _reconfiguring = self.reconfigure_lock.lock();
            match self.routing.write().take() {
                Some(state) => state,
                None => return Ok(()),
            }
        };

        if let Router::Optimized { resolver, .. } = &state.router {
            resolver.close();
        }
        let result = state.pool.close();
        debug!("Closed routing client for {}", self.target);
        result
    }

    /// Routing service.
    pub fn routing_v2(&self) -> RoutingV2<'_> {
        RoutingV2::new(self)
    }

    /// Key-value service.
    pub fn kv_v1(&self) -> KvV1<'_> {
        KvV1::new(self)
    }

    /// Query service.
    pub fn query_v1(&self) -> QueryV1<'_> {
        QueryV1::new(self)
    }

    /// Analytics service.
    pub fn analytics_v1(&self) -> AnalyticsV1<'_> {
        AnalyticsV1::new(self)
    }

    /// Search service.
    pub fn search_v1(&self) -> SearchV1<'_> {
        SearchV1::new(self)
    }

    /// Bucket administration service.
    pub fn bucket_admin_v1(&self) -> BucketAdminV1<'_> {
        BucketAdminV1::new(self)
    }

    /// Collection administration service.
    pub fn collection_admin_v1(&self) -> CollectionAdminV1<'_> {
        CollectionAdminV1::new(self)
    }

    /// View service.
    pub fn view_v1(&self) -> ViewV1<'_> {
        ViewV1::new(self)
    }

    /// Query index administration service.
    pub fn query_admin_v1(&self) -> QueryAdminV1<'_> {
        QueryAdminV1::new(self)
    }

    /// Search index administration service.
    pub fn search_admin_v1(&self) -> SearchAdminV1<'_> {
        SearchAdminV1::new(self)
    }
}

impl Drop for RoutingClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for RoutingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingClient")
            .field("target", &self.target)
            .field("state", &self.connection_state())
            .finish()
    }
}
