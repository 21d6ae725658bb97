//! tarpc client utilities.
//!
//! This module provides the [`Connection`] to a single gateway node, the
//! [`Dialer`] seam used by the resolver to open connections, and the TCP
//! connection functions with timeout and retry behind [`TcpDialer`].

use crate::auth::Authenticator;
use crate::error::{RoutingError, RoutingResult};
use crate::rpc::messages::*;
use crate::rpc::protocol::{CallMetadata, GatewayServiceClient, GatewayServiceRequest, GatewayServiceResponse};
use async_trait::async_trait;
use shardgate_core::Address;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tarpc::client::{Config, RpcError};
use tarpc::context::{self, Context};
use tarpc::{ClientMessage, Response, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_serde::formats::Bincode;
use tracing::{debug, error, info, warn};

/// Default connection timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default number of retry attempts for failed connections.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between retry attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Default deadline for unary calls in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default deadline of one routing long-poll in milliseconds.
pub const DEFAULT_WATCH_TIMEOUT_MS: u64 = 60_000;

/// Configuration for client connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Number of retry attempts.
    pub retry_attempts: u32,
    /// Delay between retries.
    pub retry_delay: Duration,
    /// Maximum pending requests per connection.
    pub max_pending_requests: usize,
    /// Deadline applied to unary calls.
    pub request_timeout: Duration,
    /// Deadline of one routing long-poll before it is re-issued.
    pub watch_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_pending_requests: 100,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            watch_timeout: Duration::from_millis(DEFAULT_WATCH_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    fn tarpc_config(&self) -> Config {
        let mut tarpc_config = Config::default();
        tarpc_config.max_in_flight_requests = self.max_pending_requests;
        tarpc_config
    }
}

struct ConnectionInner {
    address: Address,
    client: GatewayServiceClient,
    dispatch: JoinHandle<()>,
    /// Set once the session can no longer serve calls.
    terminated: Arc<watch::Sender<bool>>,
    closed: AtomicBool,
    authenticator: Option<Authenticator>,
    request_timeout: Duration,
    watch_timeout: Duration,
}

/// One multiplexed RPC session to a gateway node.
///
/// Cloning is cheap; every clone shares the same session. The connection
/// owns the task that drives the transport. Closing it aborts that task,
/// which fails all in-flight calls.
///
/// Credentials are read from the shared [`Authenticator`] on every call, so
/// swapping them never requires a reconnect.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap an established transport.
    ///
    /// Must be called from within a tokio runtime; the request dispatch is
    /// spawned onto it.
    pub fn from_transport<T>(
        address: Address,
        transport: T,
        config: &ClientConfig,
        authenticator: Option<Authenticator>,
    ) -> Self
    where
        T: Transport<ClientMessage<GatewayServiceRequest>, Response<GatewayServiceResponse>>
            + Send
            + 'static,
    {
        let new_client = GatewayServiceClient::new(config.tarpc_config(), transport);
        let (terminated, _) = watch::channel(false);
        let terminated = Arc::new(terminated);
        let dispatch_terminated = Arc::clone(&terminated);
        let dispatch_address = address.clone();
        let dispatch = new_client.dispatch;
        let dispatch = tokio::spawn(async move {
            if let Err(e) = dispatch.await {
                warn!("Connection to {} terminated: {}", dispatch_address, e);
            }
            dispatch_terminated.send_replace(true);
        });

        Self {
            inner: Arc::new(ConnectionInner {
                address,
                client: new_client.client,
                dispatch,
                terminated,
                closed: AtomicBool::new(false),
                authenticator,
                request_timeout: config.request_timeout,
                watch_timeout: config.watch_timeout,
            }),
        }
    }

    /// The address this connection is bound to.
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// Whether the connection can currently serve calls.
    pub fn is_ready(&self) -> bool {
        !self.is_closed() && !*self.inner.terminated.borrow()
    }

    /// Resolve once the connection stops being ready, either because it was
    /// closed or because its transport ended.
    pub async fn terminated(&self) {
        let mut terminated = self.inner.terminated.subscribe();
        while !*terminated.borrow_and_update() {
            if terminated.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the session.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::ConnectionClosed`] if it was already closed.
    pub fn close(&self) -> RoutingResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(RoutingError::ConnectionClosed(self.inner.address.clone()));
        }
        self.inner.dispatch.abort();
        self.inner.terminated.send_replace(true);
        debug!("Closed connection to {}", self.inner.address);
        Ok(())
    }

    /// Whether two handles share the same session.
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The metadata attached to the next call.
    pub fn call_metadata(&self) -> CallMetadata {
        self.inner
            .authenticator
            .as_ref()
            .map(Authenticator::call_metadata)
            .unwrap_or_default()
    }

    fn context(&self, timeout: Duration) -> Context {
        let mut ctx = context::current();
        ctx.deadline = SystemTime::now() + timeout;
        ctx
    }

    fn request_context(&self) -> RoutingResult<Context> {
        if self.is_closed() {
            return Err(RoutingError::ConnectionClosed(self.inner.address.clone()));
        }
        Ok(self.context(self.inner.request_timeout))
    }

    /// Start watching a bucket's routing on this node.
    ///
    /// Returns the first routing message together with the watch that yields
    /// the following ones. The first message must arrive within the request
    /// timeout; only later polls are re-issued when they expire.
    pub async fn watch_routing(
        &self,
        bucket_name: &str,
    ) -> RoutingResult<(WatchRoutingResponse, RoutingWatch)> {
        let mut watch = RoutingWatch {
            connection: self.clone(),
            bucket_name: bucket_name.to_string(),
            revision: None,
        };
        let first = watch
            .poll(self.inner.request_timeout)
            .await?
            .ok_or_else(|| RoutingError::from(RpcError::DeadlineExceeded))?;
        Ok((first, watch))
    }

    /// List all buckets.
    pub async fn list_buckets(&self) -> RoutingResult<ListBucketsResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.list_buckets(ctx, self.call_metadata()).await??)
    }

    /// Create a bucket.
    pub async fn create_bucket(&self, req: CreateBucketRequest) -> RoutingResult<()> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.create_bucket(ctx, self.call_metadata(), req).await??)
    }

    /// Delete a bucket.
    pub async fn delete_bucket(&self, req: DeleteBucketRequest) -> RoutingResult<()> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.delete_bucket(ctx, self.call_metadata(), req).await??)
    }

    /// List the scopes and collections of a bucket.
    pub async fn list_collections(
        &self,
        req: ListCollectionsRequest,
    ) -> RoutingResult<ListCollectionsResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.list_collections(ctx, self.call_metadata(), req).await??)
    }

    /// Create a scope.
    pub async fn create_scope(&self, req: CreateScopeRequest) -> RoutingResult<()> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.create_scope(ctx, self.call_metadata(), req).await??)
    }

    /// Delete a scope.
    pub async fn delete_scope(&self, req: DeleteScopeRequest) -> RoutingResult<()> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.delete_scope(ctx, self.call_metadata(), req).await??)
    }

    /// Create a collection.
    pub async fn create_collection(&self, req: CreateCollectionRequest) -> RoutingResult<()> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.create_collection(ctx, self.call_metadata(), req).await??)
    }

    /// Delete a collection.
    pub async fn delete_collection(&self, req: DeleteCollectionRequest) -> RoutingResult<()> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.delete_collection(ctx, self.call_metadata(), req).await??)
    }

    /// Fetch a document.
    pub async fn kv_get(&self, req: GetRequest) -> RoutingResult<GetResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.kv_get(ctx, self.call_metadata(), req).await??)
    }

    /// Insert or replace a document.
    pub async fn kv_upsert(&self, req: UpsertRequest) -> RoutingResult<MutationResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.kv_upsert(ctx, self.call_metadata(), req).await??)
    }

    /// Remove a document.
    pub async fn kv_remove(&self, req: RemoveRequest) -> RoutingResult<MutationResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.kv_remove(ctx, self.call_metadata(), req).await??)
    }

    /// Run a query statement.
    pub async fn query(&self, req: QueryRequest) -> RoutingResult<QueryResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.query(ctx, self.call_metadata(), req).await??)
    }

    /// Run an analytics statement.
    pub async fn analytics_query(&self, req: AnalyticsQueryRequest) -> RoutingResult<QueryResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.analytics_query(ctx, self.call_metadata(), req).await??)
    }

    /// Run a full-text search.
    pub async fn search_query(&self, req: SearchQueryRequest) -> RoutingResult<SearchQueryResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.search_query(ctx, self.call_metadata(), req).await??)
    }

    /// Query a view.
    pub async fn view_query(&self, req: ViewQueryRequest) -> RoutingResult<ViewQueryResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.view_query(ctx, self.call_metadata(), req).await??)
    }

    /// List query indexes.
    pub async fn get_all_indexes(
        &self,
        req: GetAllIndexesRequest,
    ) -> RoutingResult<GetAllIndexesResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.get_all_indexes(ctx, self.call_metadata(), req).await??)
    }

    /// Create a primary query index.
    pub async fn create_primary_index(&self, req: CreatePrimaryIndexRequest) -> RoutingResult<()> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.create_primary_index(ctx, self.call_metadata(), req).await??)
    }

    /// List search indexes.
    pub async fn list_search_indexes(&self) -> RoutingResult<ListSearchIndexesResponse> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.list_search_indexes(ctx, self.call_metadata()).await??)
    }

    /// Create a search index.
    pub async fn create_search_index(&self, req: CreateSearchIndexRequest) -> RoutingResult<()> {
        let ctx = self.request_context()?;
        Ok(self.inner.client.create_search_index(ctx, self.call_metadata(), req).await??)
    }
}

#[cfg(test)]
impl Connection {
    /// A connection whose peer never answers; enough for routing bookkeeping.
    pub(crate) fn detached(address: &str) -> Self {
        let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
        // Keep the server half alive for the lifetime of the test.
        std::mem::forget(server_transport);
        Self::from_transport(
            Address::new(address),
            client_transport,
            &ClientConfig::default(),
            None,
        )
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Stream of routing messages for one bucket on one node.
///
/// Each [`next`](Self::next) issues a long-poll carrying the last revision
/// seen. A poll that hits its deadline is re-issued; any other failure ends
/// the watch and must be treated as stream closure.
pub struct RoutingWatch {
    connection: Connection,
    bucket_name: String,
    revision: Option<u64>,
}

impl RoutingWatch {
    /// The bucket being watched.
    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// The node being watched.
    pub fn address(&self) -> &Address {
        self.connection.address()
    }

    /// Wait for the next routing message.
    pub async fn next(&mut self) -> RoutingResult<WatchRoutingResponse> {
        let timeout = self.connection.inner.watch_timeout;
        loop {
            if let Some(resp) = self.poll(timeout).await? {
                return Ok(resp);
            }
            debug!(
                bucket = %self.bucket_name,
                address = %self.connection.address(),
                "Routing poll expired, re-polling"
            );
        }
    }

    /// Issue one long-poll. `Ok(None)` means it expired without a message.
    async fn poll(&mut self, timeout: Duration) -> RoutingResult<Option<WatchRoutingResponse>> {
        if self.connection.is_closed() {
            return Err(RoutingError::ConnectionClosed(self.connection.address().clone()));
        }

        let ctx = self.connection.context(timeout);
        let req = WatchRoutingRequest {
            bucket_name: self.bucket_name.clone(),
            known_revision: self.revision,
        };
        let result = self
            .connection
            .inner
            .client
            .watch_routing(ctx, self.connection.call_metadata(), req)
            .await;

        match result {
            Ok(Ok(resp)) => {
                self.revision = Some(resp.revision);
                Ok(Some(resp))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(RpcError::DeadlineExceeded) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Opens connections to gateway nodes.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a connection to `address`.
    async fn dial(
        &self,
        address: &Address,
        config: &ClientConfig,
        authenticator: Option<Authenticator>,
    ) -> RoutingResult<Connection>;
}

/// Dials gateway nodes over TCP with bincode framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(
        &self,
        address: &Address,
        config: &ClientConfig,
        authenticator: Option<Authenticator>,
    ) -> RoutingResult<Connection> {
        connect_with_retry(address, config, authenticator)
            .await
            .map_err(|source| RoutingError::Dial {
                address: address.clone(),
                source,
            })
    }
}

/// Create a connection to a gateway node with custom configuration.
///
/// # Errors
///
/// Returns an error if the connection cannot be established within the
/// configured timeout.
pub async fn connect_with_config(
    address: &Address,
    config: &ClientConfig,
    authenticator: Option<Authenticator>,
) -> Result<Connection, std::io::Error> {
    debug!("Connecting to {}", address);

    let transport = tokio::time::timeout(
        config.connect_timeout,
        tarpc::serde_transport::tcp::connect(address.as_str(), Bincode::default),
    )
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout"))??;

    let connection = Connection::from_transport(address.clone(), transport, config, authenticator);
    info!("Connected to {}", address);
    Ok(connection)
}

/// Connect to a gateway node with automatic retry on failure.
///
/// # Errors
///
/// Returns the last error if all retry attempts fail.
pub async fn connect_with_retry(
    address: &Address,
    config: &ClientConfig,
    authenticator: Option<Authenticator>,
) -> Result<Connection, std::io::Error> {
    let mut last_error = None;
    let attempts = config.retry_attempts.max(1);

    for attempt in 0..attempts {
        if attempt > 0 {
            warn!("Retry attempt {} connecting to {}", attempt + 1, address);
            tokio::time::sleep(config.retry_delay).await;
        }

        match connect_with_config(address, config, authenticator.clone()).await {
            Ok(connection) => {
                if attempt > 0 {
                    info!(
                        "Successfully connected to {} after {} attempts",
                        address,
                        attempt + 1
                    );
                }
                return Ok(connection);
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", address, e);
                last_error = Some(e);
            }
        }
    }

    error!("Failed to connect to {} after {} attempts", address, attempts);
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "connection failed")
    }))
}
