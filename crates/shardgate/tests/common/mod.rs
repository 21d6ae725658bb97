//! In-process fake cluster for integration tests.
//!
//! Every fake node serves `GatewayService` over tarpc's in-memory channel
//! transport. The fake dialer connects to nodes by address and the fake name
//! resolver returns whatever address list the test sets.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use shardgate::rpc::messages::*;
use shardgate::rpc::{CallMetadata, GatewayService, ServiceError, ServiceResult};
use shardgate::{
    Address, Authenticator, ClientConfig, Connection, Dialer, NameResolver, RoutingError,
    RoutingResult, Target,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tarpc::context::Context;
use tarpc::server::{BaseChannel, Channel};
use tokio::sync::watch;

/// Install a test log subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct NodeState {
    buckets: Vec<String>,
    routing: HashMap<String, WatchRoutingResponse>,
    broken: HashSet<String>,
    stalled: HashSet<String>,
    authorization: Vec<Option<String>>,
    query_indexes: Vec<QueryIndex>,
    search_indexes: Vec<SearchIndex>,
}

/// One fake gateway node.
pub struct FakeNode {
    pub address: Address,
    state: Mutex<NodeState>,
    changes: watch::Sender<u64>,
    kv_calls: AtomicUsize,
}

impl FakeNode {
    pub fn new(address: &str) -> Arc<Self> {
        let (changes, _) = watch::channel(0);
        Arc::new(Self {
            address: Address::new(address),
            state: Mutex::new(NodeState::default()),
            changes,
            kv_calls: AtomicUsize::new(0),
        })
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    /// Set the buckets this node lists.
    pub fn set_buckets(&self, buckets: &[&str]) {
        self.state.lock().buckets = buckets.iter().map(|b| b.to_string()).collect();
        self.notify();
    }

    /// Set this node's local vbuckets for a bucket, bumping its revision.
    pub fn set_routing(&self, bucket: &str, num_vbuckets: u32, local_vbuckets: Vec<u32>) {
        {
            let mut state = self.state.lock();
            let revision = state.routing.get(bucket).map_or(1, |r| r.revision + 1);
            state.routing.insert(
                bucket.to_string(),
                WatchRoutingResponse {
                    revision,
                    vbucket_routing: Some(VbucketDataRouting {
                        num_vbuckets,
                        local_vbuckets,
                    }),
                },
            );
        }
        self.notify();
    }

    /// Fail every current and future routing watch of a bucket.
    pub fn break_stream(&self, bucket: &str) {
        self.state.lock().broken.insert(bucket.to_string());
        self.notify();
    }

    /// Never answer any routing watch of a bucket.
    pub fn stall_stream(&self, bucket: &str) {
        self.state.lock().stalled.insert(bucket.to_string());
    }

    /// Authorization headers seen so far, in call order.
    pub fn authorization_seen(&self) -> Vec<Option<String>> {
        self.state.lock().authorization.clone()
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.lock().authorization.last().cloned().flatten()
    }

    pub fn kv_calls(&self) -> usize {
        self.kv_calls.load(Ordering::SeqCst)
    }

    fn record(&self, meta: &CallMetadata) {
        self.state.lock().authorization.push(meta.authorization.clone());
    }
}

#[derive(Clone)]
struct FakeGateway {
    node: Arc<FakeNode>,
}

impl GatewayService for FakeGateway {
    async fn watch_routing(
        self,
        _: Context,
        meta: CallMetadata,
        req: WatchRoutingRequest,
    ) -> ServiceResult<WatchRoutingResponse> {
        self.node.record(&meta);
        let stalled = self.node.state.lock().stalled.contains(&req.bucket_name);
        if stalled {
            return futures::future::pending().await;
        }
        let mut changes = self.node.changes.subscribe();
        loop {
            {
                let state = self.node.state.lock();
                if state.broken.contains(&req.bucket_name) {
                    return Err(ServiceError::Unavailable("routing stream closed".into()));
                }
                let current = state
                    .routing
                    .get(&req.bucket_name)
                    .ok_or_else(|| ServiceError::BucketNotFound(req.bucket_name.clone()))?;
                if req.known_revision.map_or(true, |known| current.revision > known) {
                    return Ok(current.clone());
                }
            }
            if changes.changed().await.is_err() {
                return Err(ServiceError::Unavailable("node stopped".into()));
            }
        }
    }

    async fn list_buckets(self, _: Context, meta: CallMetadata) -> ServiceResult<ListBucketsResponse> {
        self.node.record(&meta);
        let buckets = self
            .node
            .state
            .lock()
            .buckets
            .iter()
            .map(|name| BucketInfo {
                bucket_name: name.clone(),
            })
            .collect();
        Ok(ListBucketsResponse { buckets })
    }

    async fn create_bucket(self, _: Context, meta: CallMetadata, req: CreateBucketRequest) -> ServiceResult<()> {
        self.node.record(&meta);
        let mut state = self.node.state.lock();
        if state.buckets.contains(&req.bucket_name) {
            return Err(ServiceError::AlreadyExists(req.bucket_name));
        }
        state.buckets.push(req.bucket_name);
        Ok(())
    }

    async fn delete_bucket(self, _: Context, meta: CallMetadata, req: DeleteBucketRequest) -> ServiceResult<()> {
        self.node.record(&meta);
        let mut state = self.node.state.lock();
        let before = state.buckets.len();
        state.buckets.retain(|b| b != &req.bucket_name);
        if state.buckets.len() == before {
            return Err(ServiceError::BucketNotFound(req.bucket_name));
        }
        Ok(())
    }

    async fn list_collections(
        self,
        _: Context,
        meta: CallMetadata,
        _: ListCollectionsRequest,
    ) -> ServiceResult<ListCollectionsResponse> {
        self.node.record(&meta);
        Ok(ListCollectionsResponse {
            scopes: vec![ScopeSpec {
                scope_name: "_default".into(),
                collections: vec!["_default".into()],
            }],
        })
    }

    async fn create_scope(self, _: Context, meta: CallMetadata, _: CreateScopeRequest) -> ServiceResult<()> {
        self.node.record(&meta);
        Ok(())
    }

    async fn delete_scope(self, _: Context, meta: CallMetadata, req: DeleteScopeRequest) -> ServiceResult<()> {
        self.node.record(&meta);
        Err(ServiceError::CollectionNotFound(req.scope_name))
    }

    async fn create_collection(
        self,
        _: Context,
        meta: CallMetadata,
        _: CreateCollectionRequest,
    ) -> ServiceResult<()> {
        self.node.record(&meta);
        Ok(())
    }

    async fn delete_collection(
        self,
        _: Context,
        meta: CallMetadata,
        _: DeleteCollectionRequest,
    ) -> ServiceResult<()> {
        self.node.record(&meta);
        Ok(())
    }

    async fn kv_get(self, _: Context, meta: CallMetadata, _: GetRequest) -> ServiceResult<GetResponse> {
        self.node.record(&meta);
        self.node.kv_calls.fetch_add(1, Ordering::SeqCst);
        // The body names the serving node.
        Ok(GetResponse {
            content: self.node.address.as_str().as_bytes().to_vec(),
            cas: 1,
        })
    }

    async fn kv_upsert(self, _: Context, meta: CallMetadata, _: UpsertRequest) -> ServiceResult<MutationResponse> {
        self.node.record(&meta);
        self.node.kv_calls.fetch_add(1, Ordering::SeqCst);
        Ok(MutationResponse { cas: 2 })
    }

    async fn kv_remove(self, _: Context, meta: CallMetadata, req: RemoveRequest) -> ServiceResult<MutationResponse> {
        self.node.record(&meta);
        self.node.kv_calls.fetch_add(1, Ordering::SeqCst);
        match req.cas {
            Some(0) => Err(ServiceError::DocumentNotFound(req.id.key)),
            _ => Ok(MutationResponse { cas: 3 }),
        }
    }

    async fn query(self, _: Context, meta: CallMetadata, req: QueryRequest) -> ServiceResult<QueryResponse> {
        self.node.record(&meta);
        Ok(QueryResponse {
            rows: vec![req.statement.into_bytes()],
        })
    }

    async fn analytics_query(
        self,
        _: Context,
        meta: CallMetadata,
        req: AnalyticsQueryRequest,
    ) -> ServiceResult<QueryResponse> {
        self.node.record(&meta);
        Ok(QueryResponse {
            rows: vec![req.statement.into_bytes()],
        })
    }

    async fn search_query(
        self,
        _: Context,
        meta: CallMetadata,
        req: SearchQueryRequest,
    ) -> ServiceResult<SearchQueryResponse> {
        self.node.record(&meta);
        Ok(SearchQueryResponse {
            hits: vec![SearchHit {
                id: req.query,
                score: 1.0,
            }],
        })
    }

    async fn view_query(self, _: Context, meta: CallMetadata, req: ViewQueryRequest) -> ServiceResult<ViewQueryResponse> {
        self.node.record(&meta);
        Ok(ViewQueryResponse {
            rows: vec![ViewRow {
                id: format!("{}/{}", req.design_document_name, req.view_name),
                key: req.bucket_name.into_bytes(),
                value: Vec::new(),
            }],
        })
    }

    async fn get_all_indexes(
        self,
        _: Context,
        meta: CallMetadata,
        req: GetAllIndexesRequest,
    ) -> ServiceResult<GetAllIndexesResponse> {
        self.node.record(&meta);
        let indexes = self
            .node
            .state
            .lock()
            .query_indexes
            .iter()
            .filter(|index| req.bucket_name.as_ref().map_or(true, |b| &index.bucket_name == b))
            .cloned()
            .collect();
        Ok(GetAllIndexesResponse { indexes })
    }

    async fn create_primary_index(
        self,
        _: Context,
        meta: CallMetadata,
        req: CreatePrimaryIndexRequest,
    ) -> ServiceResult<()> {
        self.node.record(&meta);
        let mut state = self.node.state.lock();
        let exists = state
            .query_indexes
            .iter()
            .any(|index| index.is_primary && index.bucket_name == req.bucket_name);
        if exists {
            if req.ignore_if_exists {
                return Ok(());
            }
            return Err(ServiceError::AlreadyExists("#primary".into()));
        }
        state.query_indexes.push(QueryIndex {
            bucket_name: req.bucket_name,
            name: "#primary".into(),
            is_primary: true,
        });
        Ok(())
    }

    async fn list_search_indexes(self, _: Context, meta: CallMetadata) -> ServiceResult<ListSearchIndexesResponse> {
        self.node.record(&meta);
        Ok(ListSearchIndexesResponse {
            indexes: self.node.state.lock().search_indexes.clone(),
        })
    }

    async fn create_search_index(
        self,
        _: Context,
        meta: CallMetadata,
        req: CreateSearchIndexRequest,
    ) -> ServiceResult<()> {
        self.node.record(&meta);
        self.node.state.lock().search_indexes.push(SearchIndex {
            name: req.name,
            source_name: req.source_name,
        });
        Ok(())
    }
}

/// All fake nodes, by address.
#[derive(Default)]
pub struct FakeCluster {
    nodes: Mutex<HashMap<Address, Arc<FakeNode>>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, address: &str) -> Arc<FakeNode> {
        let node = FakeNode::new(address);
        self.nodes.lock().insert(node.address.clone(), Arc::clone(&node));
        node
    }

    pub fn node(&self, address: &Address) -> Option<Arc<FakeNode>> {
        self.nodes.lock().get(address).cloned()
    }
}

/// Dials fake nodes over in-memory transports.
pub struct FakeDialer {
    cluster: Arc<FakeCluster>,
    dials: AtomicUsize,
}

impl FakeDialer {
    pub fn new(cluster: Arc<FakeCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            dials: AtomicUsize::new(0),
        })
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        address: &Address,
        config: &ClientConfig,
        authenticator: Option<Authenticator>,
    ) -> RoutingResult<Connection> {
        let node = self.cluster.node(address).ok_or_else(|| RoutingError::Dial {
            address: address.clone(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no such node"),
        })?;
        self.dials.fetch_add(1, Ordering::SeqCst);

        let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
        let gateway = FakeGateway { node };
        tokio::spawn(
            BaseChannel::with_defaults(server_transport)
                .execute(gateway.serve())
                .for_each(|response| async move {
                    tokio::spawn(response);
                }),
        );

        Ok(Connection::from_transport(
            address.clone(),
            client_transport,
            config,
            authenticator,
        ))
    }
}

/// Name resolver returning a settable address list.
#[derive(Default)]
pub struct FakeNameResolver {
    addresses: Mutex<Vec<Address>>,
    failing: AtomicBool,
    lookups: AtomicUsize,
}

impl FakeNameResolver {
    pub fn new(addresses: &[&str]) -> Arc<Self> {
        let resolver = Self::default();
        resolver.set_addresses(addresses);
        Arc::new(resolver)
    }

    pub fn set_addresses(&self, addresses: &[&str]) {
        *self.addresses.lock() = addresses.iter().map(|a| Address::new(*a)).collect();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameResolver for FakeNameResolver {
    async fn resolve(&self, target: &Target) -> RoutingResult<Vec<Address>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RoutingError::Lookup {
                host: target.host().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "lookup failed"),
            });
        }
        Ok(self.addresses.lock().clone())
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
