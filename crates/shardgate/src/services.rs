//! Per-service forwarders.
//!
//! Each accessor on [`RoutingClient`] returns one of these. They hold no
//! state of their own: every call asks the client for a connection, with a
//! routing hint where the request carries a bucket and key, and forwards the
//! request unchanged.

use crate::client::RoutingClient;
use crate::error::RoutingResult;
use crate::rpc::messages::*;
use crate::rpc::RoutingWatch;

/// Routing service forwarder.
#[derive(Debug, Clone, Copy)]
pub struct RoutingV2<'a> {
    client: &'a RoutingClient,
}

impl<'a> RoutingV2<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    /// Watch a bucket's routing on whichever node the client picks.
    pub async fn watch_routing(
        &self,
        bucket_name: &str,
    ) -> RoutingResult<(WatchRoutingResponse, RoutingWatch)> {
        self.client
            .fetch_connection(None)?
            .watch_routing(bucket_name)
            .await
    }
}

/// Key-value service forwarder. Calls go to the owner of the document.
#[derive(Debug, Clone, Copy)]
pub struct KvV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> KvV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, req: GetRequest) -> RoutingResult<GetResponse> {
        let conn = self.client.fetch_connection(Some(&req.id.routing_hint()))?;
        conn.kv_get(req).await
    }

    pub async fn upsert(&self, req: UpsertRequest) -> RoutingResult<MutationResponse> {
        let conn = self.client.fetch_connection(Some(&req.id.routing_hint()))?;
        conn.kv_upsert(req).await
    }

    pub async fn remove(&self, req: RemoveRequest) -> RoutingResult<MutationResponse> {
        let conn = self.client.fetch_connection(Some(&req.id.routing_hint()))?;
        conn.kv_remove(req).await
    }
}

/// Query service forwarder.
#[derive(Debug, Clone, Copy)]
pub struct QueryV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> QueryV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn query(&self, req: QueryRequest) -> RoutingResult<QueryResponse> {
        let conn = match &req.bucket_name {
            Some(bucket_name) => self.client.fetch_connection_for_bucket(bucket_name)?,
            None => self.client.fetch_connection(None)?,
        };
        conn.query(req).await
    }
}

/// Analytics service forwarder.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> AnalyticsV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn analytics_query(&self, req: AnalyticsQueryRequest) -> RoutingResult<QueryResponse> {
        self.client.fetch_connection(None)?.analytics_query(req).await
    }
}

/// Search service forwarder.
#[derive(Debug, Clone, Copy)]
pub struct SearchV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> SearchV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn search_query(&self, req: SearchQueryRequest) -> RoutingResult<SearchQueryResponse> {
        self.client.fetch_connection(None)?.search_query(req).await
    }
}

/// Bucket administration forwarder.
#[derive(Debug, Clone, Copy)]
pub struct BucketAdminV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> BucketAdminV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn list_buckets(&self) -> RoutingResult<ListBucketsResponse> {
        self.client.fetch_connection(None)?.list_buckets().await
    }

    pub async fn create_bucket(&self, req: CreateBucketRequest) -> RoutingResult<()> {
        self.client.fetch_connection(None)?.create_bucket(req).await
    }

    pub async fn delete_bucket(&self, req: DeleteBucketRequest) -> RoutingResult<()> {
        self.client.fetch_connection(None)?.delete_bucket(req).await
    }
}

/// Collection administration forwarder.
#[derive(Debug, Clone, Copy)]
pub struct CollectionAdminV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> CollectionAdminV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn list_collections(
        &self,
        req: ListCollectionsRequest,
    ) -> RoutingResult<ListCollectionsResponse> {
        self.client
            .fetch_connection_for_bucket(&req.bucket_name)?
            .list_collections(req)
            .await
    }

    pub async fn create_scope(&self, req: CreateScopeRequest) -> RoutingResult<()> {
        self.client
            .fetch_connection_for_bucket(&req.bucket_name)?
            .create_scope(req)
            .await
    }

    pub async fn delete_scope(&self, req: DeleteScopeRequest) -> RoutingResult<()> {
        self.client
            .fetch_connection_for_bucket(&req.bucket_name)?
            .delete_scope(req)
            .await
    }

    pub async fn create_collection(&self, req: CreateCollectionRequest) -> RoutingResult<()> {
        self.client
            .fetch_connection_for_bucket(&req.bucket_name)?
            .create_collection(req)
            .await
    }

    pub async fn delete_collection(&self, req: DeleteCollectionRequest) -> RoutingResult<()> {
        self.client
            .fetch_connection_for_bucket(&req.bucket_name)?
            .delete_collection(req)
            .await
    }
}

/// View service forwarder.
#[derive(Debug, Clone, Copy)]
pub struct ViewV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> ViewV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn view_query(&self, req: ViewQueryRequest) -> RoutingResult<ViewQueryResponse> {
        self.client
            .fetch_connection_for_bucket(&req.bucket_name)?
            .view_query(req)
            .await
    }
}

/// Query index administration forwarder.
#[derive(Debug, Clone, Copy)]
pub struct QueryAdminV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> QueryAdminV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn get_all_indexes(
        &self,
        req: GetAllIndexesRequest,
    ) -> RoutingResult<GetAllIndexesResponse> {
        let conn = match &req.bucket_name {
            Some(bucket_name) => self.client.fetch_connection_for_bucket(bucket_name)?,
            None => self.client.fetch_connection(None)?,
        };
        conn.get_all_indexes(req).await
    }

    pub async fn create_primary_index(&self, req: CreatePrimaryIndexRequest) -> RoutingResult<()> {
        self.client
            .fetch_connection_for_bucket(&req.bucket_name)?
            .create_primary_index(req)
            .await
    }
}

/// Search index administration forwarder.
#[derive(Debug, Clone, Copy)]
pub struct SearchAdminV1<'a> {
    client: &'a RoutingClient,
}

impl<'a> SearchAdminV1<'a> {
    pub(crate) fn new(client: &'a RoutingClient) -> Self {
        Self { client }
    }

    pub async fn list_search_indexes(&self) -> RoutingResult<ListSearchIndexesResponse> {
        self.client.fetch_connection(None)?.list_search_indexes().await
    }

    pub async fn create_search_index(&self, req: CreateSearchIndexRequest) -> RoutingResult<()> {
        self.client.fetch_connection(None)?.create_search_index(req).await
    }
}
