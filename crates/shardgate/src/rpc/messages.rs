//! Request and response messages for the gateway service.
//!
//! Payloads are deliberately minimal: the router only inspects bucket names,
//! keys and routing responses. Everything else is carried opaquely.

use serde::{Deserialize, Serialize};
use shardgate_core::{BucketRouting, RoutingHint};

/// Request to watch a bucket's vbucket routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRoutingRequest {
    /// The bucket to watch.
    pub bucket_name: String,
    /// Last revision the caller has seen, if any.
    pub known_revision: Option<u64>,
}

/// Vbucket routing of one bucket on the responding node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbucketDataRouting {
    /// Number of vbuckets in the bucket.
    pub num_vbuckets: u32,
    /// Vbuckets the responding node holds locally.
    pub local_vbuckets: Vec<u32>,
}

/// One routing message on a watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRoutingResponse {
    /// Monotonic revision of the node's routing for the bucket.
    pub revision: u64,
    /// Vbucket routing, absent for buckets without vbuckets.
    pub vbucket_routing: Option<VbucketDataRouting>,
}

impl WatchRoutingResponse {
    /// The ownership this message reports, if the bucket uses vbuckets.
    pub fn bucket_routing(&self) -> Option<BucketRouting> {
        self.vbucket_routing
            .as_ref()
            .map(|r| BucketRouting::new(r.num_vbuckets, r.local_vbuckets.clone()))
    }
}

/// A bucket as listed by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    /// Bucket name.
    pub bucket_name: String,
}

/// Response listing all buckets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBucketsResponse {
    /// Known buckets.
    pub buckets: Vec<BucketInfo>,
}

/// Request to create a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBucketRequest {
    /// Bucket name.
    pub bucket_name: String,
    /// Memory quota in megabytes.
    pub ram_quota_mb: u64,
    /// Number of replicas.
    pub num_replicas: u32,
}

/// Request to delete a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBucketRequest {
    /// Bucket name.
    pub bucket_name: String,
}

/// Request listing the scopes of a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCollectionsRequest {
    /// Bucket name.
    pub bucket_name: String,
}

/// A scope and its collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSpec {
    /// Scope name.
    pub scope_name: String,
    /// Collection names in the scope.
    pub collections: Vec<String>,
}

/// Response listing scopes and collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCollectionsResponse {
    /// Scopes of the bucket.
    pub scopes: Vec<ScopeSpec>,
}

/// Request to create a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScopeRequest {
    pub bucket_name: String,
    pub scope_name: String,
}

/// Request to delete a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteScopeRequest {
    pub bucket_name: String,
    pub scope_name: String,
}

/// Request to create a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub bucket_name: String,
    pub scope_name: String,
    pub collection_name: String,
}

/// Request to delete a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCollectionRequest {
    pub bucket_name: String,
    pub scope_name: String,
    pub collection_name: String,
}

/// Location of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentId {
    pub bucket_name: String,
    pub scope_name: String,
    pub collection_name: String,
    pub key: String,
}

impl DocumentId {
    /// A document in the default scope and collection of a bucket.
    pub fn new(bucket_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            scope_name: "_default".to_string(),
            collection_name: "_default".to_string(),
            key: key.into(),
        }
    }

    /// The routing hint for this document.
    pub fn routing_hint(&self) -> RoutingHint {
        RoutingHint::new(self.bucket_name.clone(), &self.key)
    }
}

/// Request to fetch a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub id: DocumentId,
}

/// A fetched document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    /// Document body.
    pub content: Vec<u8>,
    /// Compare-and-swap value.
    pub cas: u64,
}

/// Request to insert or replace a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub id: DocumentId,
    pub content: Vec<u8>,
}

/// Request to remove a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub id: DocumentId,
    /// Only remove if the current CAS matches.
    pub cas: Option<u64>,
}

/// Result of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    /// CAS after the mutation.
    pub cas: u64,
}

/// A query statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub statement: String,
    /// Bucket the query is scoped to, if any.
    pub bucket_name: Option<String>,
}

/// An analytics statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsQueryRequest {
    pub statement: String,
}

/// Rows returned by a query or analytics statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Encoded result rows.
    pub rows: Vec<Vec<u8>>,
}

/// A full-text search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQueryRequest {
    pub index_name: String,
    pub query: String,
    pub limit: u32,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
}

/// Search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQueryResponse {
    pub hits: Vec<SearchHit>,
}

/// Request to query a view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewQueryRequest {
    pub bucket_name: String,
    pub design_document_name: String,
    pub view_name: String,
    pub limit: Option<u32>,
}

/// One row of a view result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRow {
    pub id: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// View results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewQueryResponse {
    pub rows: Vec<ViewRow>,
}

/// A query index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIndex {
    pub bucket_name: String,
    pub name: String,
    pub is_primary: bool,
}

/// Request to list query indexes, optionally of one bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetAllIndexesRequest {
    pub bucket_name: Option<String>,
}

/// Query indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllIndexesResponse {
    pub indexes: Vec<QueryIndex>,
}

/// Request to create a bucket's primary query index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrimaryIndexRequest {
    pub bucket_name: String,
    pub ignore_if_exists: bool,
}

/// A full-text search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndex {
    pub name: String,
    /// Bucket the index is built from.
    pub source_name: String,
}

/// Search indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSearchIndexesResponse {
    pub indexes: Vec<SearchIndex>,
}

/// Request to create a search index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSearchIndexRequest {
    pub name: String,
    pub source_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_routing_hint() {
        let id = DocumentId::new("orders", "order::42");
        let hint = id.routing_hint();

        assert_eq!(id.scope_name, "_default");
        assert_eq!(hint.bucket_name, "orders");
        assert_eq!(hint.key, b"order::42".to_vec());
    }

    #[test]
    fn test_bucket_routing_absent() {
        let resp = WatchRoutingResponse {
            revision: 3,
            vbucket_routing: None,
        };
        assert_eq!(resp.bucket_routing(), None);
    }
}
