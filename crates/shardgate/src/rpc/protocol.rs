//! tarpc service trait definitions.
//!
//! Every gateway node exposes a single [`GatewayService`] so that one
//! transport session multiplexes all service groups. Each method takes the
//! call's [`CallMetadata`] first; it carries per-call credentials the way a
//! header would.

use crate::rpc::messages::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for service calls that needs to be serializable.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Serializable error returned by a gateway node.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceError {
    #[error("Bucket '{0}' not found")]
    BucketNotFound(String),

    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Scope or collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-call metadata sent with every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    /// Value of the `authorization` header, if any.
    pub authorization: Option<String>,
}

/// Service provided by each gateway node.
///
/// The routing client only depends on `list_buckets` and `watch_routing` to
/// learn topology; the remaining methods are forwarded untouched to whichever
/// node the picker chooses.
#[tarpc::service]
pub trait GatewayService {
    /// Watch the vbucket routing of a bucket as seen by this node.
    ///
    /// Without `known_revision` the current routing is returned immediately.
    /// Otherwise the call completes once the node's routing moves past that
    /// revision. Repeated calls form the routing stream.
    async fn watch_routing(meta: CallMetadata, req: WatchRoutingRequest) -> ServiceResult<WatchRoutingResponse>;

    /// List all buckets known to the cluster.
    async fn list_buckets(meta: CallMetadata) -> ServiceResult<ListBucketsResponse>;

    /// Create a bucket.
    async fn create_bucket(meta: CallMetadata, req: CreateBucketRequest) -> ServiceResult<()>;

    /// Delete a bucket.
    async fn delete_bucket(meta: CallMetadata, req: DeleteBucketRequest) -> ServiceResult<()>;

    /// List the scopes and collections of a bucket.
    async fn list_collections(meta: CallMetadata, req: ListCollectionsRequest) -> ServiceResult<ListCollectionsResponse>;

    /// Create a scope.
    async fn create_scope(meta: CallMetadata, req: CreateScopeRequest) -> ServiceResult<()>;

    /// Delete a scope.
    async fn delete_scope(meta: CallMetadata, req: DeleteScopeRequest) -> ServiceResult<()>;

    /// Create a collection.
    async fn create_collection(meta: CallMetadata, req: CreateCollectionRequest) -> ServiceResult<()>;

    /// Delete a collection.
    async fn delete_collection(meta: CallMetadata, req: DeleteCollectionRequest) -> ServiceResult<()>;

    /// Fetch a document.
    async fn kv_get(meta: CallMetadata, req: GetRequest) -> ServiceResult<GetResponse>;

    /// Insert or replace a document.
    async fn kv_upsert(meta: CallMetadata, req: UpsertRequest) -> ServiceResult<MutationResponse>;

    /// Remove a document.
    async fn kv_remove(meta: CallMetadata, req: RemoveRequest) -> ServiceResult<MutationResponse>;

    /// Run a query statement.
    async fn query(meta: CallMetadata, req: QueryRequest) -> ServiceResult<QueryResponse>;

    /// Run an analytics statement.
    async fn analytics_query(meta: CallMetadata, req: AnalyticsQueryRequest) -> ServiceResult<QueryResponse>;

    /// Run a full-text search.
    async fn search_query(meta: CallMetadata, req: SearchQueryRequest) -> ServiceResult<SearchQueryResponse>;

    /// Query a view of a bucket.
    async fn view_query(meta: CallMetadata, req: ViewQueryRequest) -> ServiceResult<ViewQueryResponse>;

    /// List query indexes.
    async fn get_all_indexes(meta: CallMetadata, req: GetAllIndexesRequest) -> ServiceResult<GetAllIndexesResponse>;

    /// Create the primary query index of a bucket.
    async fn create_primary_index(meta: CallMetadata, req: CreatePrimaryIndexRequest) -> ServiceResult<()>;

    /// List full-text search indexes.
    async fn list_search_indexes(meta: CallMetadata) -> ServiceResult<ListSearchIndexesResponse>;

    /// Create a full-text search index.
    async fn create_search_index(meta: CallMetadata, req: CreateSearchIndexRequest) -> ServiceResult<()>;
}
